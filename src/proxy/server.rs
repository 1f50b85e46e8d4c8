//! Local SOCKS5 listener

use super::{Session, SessionConfig, SessionHandle};
use crate::transport::{Connector, TcpConnector, TransportError};
use std::collections::HashMap;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Reports a session's id when its task ends, including by panic
struct FinishedGuard {
    id: u64,
    finished: mpsc::UnboundedSender<u64>,
}

impl Drop for FinishedGuard {
    fn drop(&mut self) {
        let _ = self.finished.send(self.id);
    }
}

/// Accepts local clients and runs one [`Session`] per connection
pub struct LocalServer<C: Connector = TcpConnector> {
    listener: TcpListener,
    connector: Arc<C>,
    config: Arc<SessionConfig>,
}

impl LocalServer<TcpConnector> {
    /// Bind the local listen address, relaying over plain TCP
    pub async fn bind(addr: &str, config: SessionConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr).await?;
        info!("SOCKS5 server listening on {}", addr);

        Ok(Self::from_listener(listener, TcpConnector::new(), config))
    }
}

impl<C: Connector> LocalServer<C> {
    pub fn from_listener(listener: TcpListener, connector: C, config: SessionConfig) -> Self {
        Self {
            listener,
            connector: Arc::new(connector),
            config: Arc::new(config),
        }
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections forever
    pub async fn run(self) {
        self.run_until(std::future::pending()).await
    }

    /// Accept connections until `shutdown` resolves, then destroy every live
    /// session and wait for them to finish.
    pub async fn run_until<F>(self, shutdown: F)
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut sessions: HashMap<u64, SessionHandle> = HashMap::new();
        let mut tasks = JoinSet::new();
        let (finished_tx, mut finished_rx) = mpsc::unbounded_channel();
        let mut next_id: u64 = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,

                Some(id) = finished_rx.recv() => {
                    sessions.remove(&id);
                }

                Some(done) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = done {
                        error!("Session task failed: {}", e);
                    }
                }

                accepted = self.listener.accept() => {
                    let (stream, peer_addr) = match accepted {
                        Ok(accepted) => accepted,
                        Err(e) => {
                            warn!("Accept error: {}", e);
                            continue;
                        }
                    };

                    next_id = next_id.wrapping_add(1);
                    let id = next_id;
                    debug!("[{}] New SOCKS5 connection from {}", id, peer_addr);
                    stream.set_nodelay(true).ok();

                    let session = match Session::new(
                        id,
                        stream,
                        Arc::clone(&self.connector),
                        Arc::clone(&self.config),
                    ) {
                        Ok(session) => session,
                        Err(e) => {
                            error!("[{}] Failed to create session: {}", id, e);
                            continue;
                        }
                    };

                    sessions.insert(id, session.handle());
                    let guard = FinishedGuard {
                        id,
                        finished: finished_tx.clone(),
                    };
                    tasks.spawn(async move {
                        let _guard = guard;
                        session.run().await;
                    });
                }
            }
        }

        info!("Shutting down, closing {} active session(s)", sessions.len());
        for handle in sessions.values() {
            handle.close();
        }
        while tasks.join_next().await.is_some() {}
    }
}
