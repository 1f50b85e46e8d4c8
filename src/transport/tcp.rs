//! Raw TCP connector

use super::{Connector, TransportError};
use async_trait::async_trait;
use tokio::net::TcpStream;
use tracing::trace;

/// Connects to the upstream proxy over TCP
#[derive(Debug, Clone, Copy, Default)]
pub struct TcpConnector;

impl TcpConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream, TransportError> {
        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|source| TransportError::ConnectionFailed {
                addr: format!("{}:{}", host, port),
                source,
            })?;

        // Headers and replies are small; don't let Nagle hold them back
        stream.set_nodelay(true).ok();
        trace!("Connected to {}:{}", host, port);

        Ok(stream)
    }
}
