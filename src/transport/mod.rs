//! Transport layer
//!
//! The upstream connection is opened through a [`Connector`] so sessions can
//! run over plain TCP in production and over in-memory pipes in tests.

mod tcp;

pub use tcp::TcpConnector;

use async_trait::async_trait;
use std::io;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};

/// Transport layer errors
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Connection to {addr} failed: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("Connection closed")]
    Closed,

    #[error("Timeout")]
    Timeout,
}

/// Opens outbound connections to the upstream proxy
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Connected stream type
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Connect to `host:port`
    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream, TransportError>;
}
