//! Per-connection session
//!
//! One session owns one accepted local socket and, once the handshake names a
//! destination, one upstream socket. The session task reads the local side,
//! drives the handshake and sends everything upstream; after the upstream
//! connect a second task decrypts upstream data back to the local side. Both
//! tasks stop when the shared [`Lifecycle`] is destroyed.
//!
//! Upstream framing with one-time auth enabled:
//! ```text
//! header: [ATYP|0x10][ADDR][PORT][HMAC-SHA1(iv || key, header)[..10]]
//! chunk:  [LEN u16][HMAC-SHA1(iv || counter, payload)[..10]][PAYLOAD]
//! ```
//! Each header or chunk is encrypted as one unit.

use super::{CloseReason, Lifecycle};
use crate::crypto::{
    prepare_key, Authenticator, Crypto, CryptoError, Decryptor, Encryptor, HmacSha1, KeyMaterial,
    Method,
};
use crate::protocol::{
    Action, ConnectRequest, Handshake, Stage, CONNECT_REPLY, CONNECT_TIMEOUT, OTA_TAG_LEN,
};
use crate::transport::{Connector, TransportError};
use crate::{Error, Result};
use bytes::{BufMut, BytesMut};
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace};

/// Read buffer size for both directions
const READ_BUF_SIZE: usize = 16 * 1024;

/// Settings shared by every session of a local server
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Upstream proxy host
    pub server: String,
    /// Upstream proxy port
    pub server_port: u16,
    /// Cipher method
    pub method: Method,
    /// Password the cipher key is derived from
    pub password: String,
    /// Authenticate the header and every chunk
    pub one_time_auth: bool,
    /// Upstream connect timeout
    pub connect_timeout: Duration,
}

impl SessionConfig {
    pub fn new(
        server: impl Into<String>,
        server_port: u16,
        method: Method,
        password: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            server_port,
            method,
            password: password.into(),
            one_time_auth: false,
            connect_timeout: CONNECT_TIMEOUT,
        }
    }

    pub fn with_one_time_auth(mut self, enabled: bool) -> Self {
        self.one_time_auth = enabled;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }
}

/// Handle for tearing a running session down from outside
#[derive(Debug, Clone)]
pub struct SessionHandle {
    lifecycle: Lifecycle,
}

impl SessionHandle {
    pub fn id(&self) -> u64 {
        self.lifecycle.id()
    }

    /// Destroy the session. Returns `false` if it was already destroyed.
    pub fn close(&self) -> bool {
        self.lifecycle.destroy(CloseReason::Shutdown)
    }

    pub fn is_closed(&self) -> bool {
        self.lifecycle.is_destroyed()
    }
}

/// A single proxied connection
pub struct Session<L, C: Connector> {
    id: u64,
    config: Arc<SessionConfig>,
    connector: Arc<C>,
    lifecycle: Lifecycle,
    handshake: Handshake,
    local_rd: Option<ReadHalf<L>>,
    local_wr: Option<WriteHalf<L>>,
    remote_wr: Option<WriteHalf<C::Stream>>,
    encryptor: Encryptor,
    decryptor: Option<Decryptor>,
    auth: HmacSha1,
    chunk_count: u32,
    reverse: Option<JoinHandle<()>>,
}

impl<L, C> Session<L, C>
where
    L: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    C: Connector,
{
    /// Create a session for an accepted local stream.
    ///
    /// Fails if the configured cipher cannot be constructed; the caller
    /// should drop the stream.
    pub fn new(
        id: u64,
        local: L,
        connector: Arc<C>,
        config: Arc<SessionConfig>,
    ) -> std::result::Result<Self, CryptoError> {
        let (encryptor, decryptor) = Crypto::new(config.method, &config.password)?.into_parts();
        let (local_rd, local_wr) = tokio::io::split(local);

        Ok(Self {
            id,
            handshake: Handshake::new(config.one_time_auth),
            config,
            connector,
            lifecycle: Lifecycle::new(id),
            local_rd: Some(local_rd),
            local_wr: Some(local_wr),
            remote_wr: None,
            encryptor,
            decryptor: Some(decryptor),
            auth: HmacSha1,
            chunk_count: 0,
            reverse: None,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            lifecycle: self.lifecycle.clone(),
        }
    }

    /// Current stage; [`Stage::Destroy`] as soon as teardown has started
    pub fn stage(&self) -> Stage {
        if self.lifecycle.is_destroyed() {
            Stage::Destroy
        } else {
            self.handshake.stage()
        }
    }

    /// Drive the session until either side closes or fails
    pub async fn run(mut self) {
        let lifecycle = self.lifecycle.clone();
        let mut buf = vec![0u8; READ_BUF_SIZE];
        let mut actions = Vec::new();

        loop {
            let read = tokio::select! {
                biased;
                _ = lifecycle.destroyed() => break,
                read = read_local(self.local_rd.as_mut(), &mut buf) => read,
            };

            let n = match read {
                Ok(0) => {
                    lifecycle.destroy(CloseReason::LocalClosed);
                    break;
                }
                Ok(n) => n,
                Err(e) => {
                    lifecycle.destroy(CloseReason::Failed(TransportError::Io(e).into()));
                    break;
                }
            };
            trace!("[{}] {} bytes from local in {:?} stage", self.id, n, self.handshake.stage());

            if let Err(e) = self.on_local_data(&buf[..n], &mut actions).await {
                lifecycle.destroy(CloseReason::Failed(e));
                break;
            }
        }

        self.close().await;
    }

    async fn on_local_data(&mut self, data: &[u8], actions: &mut Vec<Action>) -> Result<()> {
        // Actions produced before a protocol error still run, in order
        let mut parsed = self.handshake.feed(data, actions);
        while !actions.is_empty() {
            for action in std::mem::take(actions) {
                self.execute(action).await?;
            }
            // Input stashed while the upstream connect was pending
            if parsed.is_ok() && self.handshake.buffered() > 0 {
                parsed = self.handshake.feed(&[], actions);
            }
        }
        parsed.map_err(Error::from)
    }

    async fn execute(&mut self, action: Action) -> Result<()> {
        match action {
            Action::Reply(reply) => {
                let local = self.local_wr.as_mut().ok_or(TransportError::Closed)?;
                write_all_or_destroyed(local, &reply, &self.lifecycle).await
            }
            Action::Connect(request) => self.connect_remote(request).await,
            Action::Forward(chunk) => self.send_chunk(&chunk).await,
        }
    }

    async fn connect_remote(&mut self, request: ConnectRequest) -> Result<()> {
        let config = Arc::clone(&self.config);
        info!(
            "[{}] Connecting to {} via {}:{}",
            self.id, request.target, config.server, config.server_port
        );

        let stream = {
            let connect = tokio::time::timeout(
                config.connect_timeout,
                self.connector.connect(&config.server, config.server_port),
            );
            tokio::pin!(connect);

            // Keep watching the local side so a client that goes away cancels the connect
            let mut buf = vec![0u8; READ_BUF_SIZE];
            loop {
                tokio::select! {
                    biased;
                    _ = self.lifecycle.destroyed() => return Err(TransportError::Closed.into()),
                    read = read_local(self.local_rd.as_mut(), &mut buf) => match read {
                        Ok(0) => {
                            self.lifecycle.destroy(CloseReason::LocalClosed);
                        }
                        Ok(n) => {
                            trace!("[{}] {} bytes from local while connecting", self.id, n);
                            self.handshake.stash(&buf[..n]);
                        }
                        Err(e) => {
                            self.lifecycle.destroy(CloseReason::Failed(TransportError::Io(e).into()));
                        }
                    },
                    result = &mut connect => break result.map_err(|_| TransportError::Timeout)??,
                }
            }
        };
        let (remote_rd, remote_wr) = tokio::io::split(stream);
        self.remote_wr = Some(remote_wr);

        let local = self.local_wr.as_mut().ok_or(TransportError::Closed)?;
        write_all_or_destroyed(local, &CONNECT_REPLY, &self.lifecycle).await?;

        // From here on the reverse task owns the local write half
        let local_wr = self.local_wr.take().ok_or(TransportError::Closed)?;
        let decryptor = self.decryptor.take().ok_or(TransportError::Closed)?;
        self.reverse = Some(tokio::spawn(relay_remote_to_local(
            remote_rd,
            local_wr,
            decryptor,
            self.lifecycle.clone(),
        )));

        self.send_header(&request.header).await?;
        debug!("[{}] Tunnel to {} established", self.id, request.target);
        Ok(())
    }

    async fn send_header(&mut self, header: &[u8]) -> Result<()> {
        let mut frame = BytesMut::with_capacity(header.len() + OTA_TAG_LEN);
        frame.put_slice(header);

        if self.config.one_time_auth {
            let key = prepare_key(self.encryptor.iv(), KeyMaterial::Bytes(self.encryptor.key()));
            let tag = self.auth.do_auth(&key, header)?;
            frame.put_slice(&tag);
        }

        let ciphertext = self.encryptor.encrypt(&frame)?;
        self.write_remote(&ciphertext).await
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> Result<()> {
        let mut frame = BytesMut::with_capacity(2 + OTA_TAG_LEN + chunk.len());

        if self.config.one_time_auth {
            // The handshake caps chunks at u16::MAX when one-time auth is on
            frame.put_u16(chunk.len() as u16);
            let key = prepare_key(self.encryptor.iv(), KeyMaterial::Counter(self.chunk_count));
            self.chunk_count = self.chunk_count.wrapping_add(1);
            let tag = self.auth.do_auth(&key, chunk)?;
            frame.put_slice(&tag);
        }
        frame.put_slice(chunk);

        let ciphertext = self.encryptor.encrypt(&frame)?;
        self.write_remote(&ciphertext).await
    }

    async fn write_remote(&mut self, data: &[u8]) -> Result<()> {
        let remote = self.remote_wr.as_mut().ok_or(TransportError::Closed)?;
        write_all_or_destroyed(remote, data, &self.lifecycle).await
    }

    async fn close(mut self) {
        self.handshake.destroy();

        if let Some(mut remote) = self.remote_wr.take() {
            let _ = remote.shutdown().await;
        }
        if let Some(mut local) = self.local_wr.take() {
            let _ = local.shutdown().await;
        }
        self.local_rd.take();

        if let Some(reverse) = self.reverse.take() {
            let _ = reverse.await;
        }
        debug!("[{}] Session finished", self.id);
    }
}

/// Upstream to local: decrypt every chunk and write it through unchanged
async fn relay_remote_to_local<R, W>(
    mut remote: R,
    mut local: W,
    mut decryptor: Decryptor,
    lifecycle: Lifecycle,
) where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];

    loop {
        let read = tokio::select! {
            _ = lifecycle.destroyed() => break,
            read = remote.read(&mut buf) => read,
        };

        let n = match read {
            Ok(0) => {
                lifecycle.destroy(CloseReason::RemoteClosed);
                break;
            }
            Ok(n) => n,
            Err(e) => {
                lifecycle.destroy(CloseReason::Failed(TransportError::Io(e).into()));
                break;
            }
        };

        let result = match decryptor.decrypt(&buf[..n]) {
            // Still collecting the upstream IV
            Ok(plain) if plain.is_empty() => Ok(()),
            Ok(plain) => write_all_or_destroyed(&mut local, &plain, &lifecycle).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            lifecycle.destroy(CloseReason::Failed(e));
            break;
        }
    }

    let _ = local.shutdown().await;
}

/// Read from the local side; pending forever once the read half is gone
async fn read_local<R>(local: Option<&mut R>, buf: &mut [u8]) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    match local {
        Some(local) => local.read(buf).await,
        None => std::future::pending().await,
    }
}

/// Write all of `data`, giving up as soon as the session is destroyed
async fn write_all_or_destroyed<W>(writer: &mut W, data: &[u8], lifecycle: &Lifecycle) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    tokio::select! {
        biased;
        _ = lifecycle.destroyed() => Err(Error::Transport(TransportError::Closed)),
        result = writer.write_all(data) => result.map_err(|e| Error::Transport(TransportError::Io(e))),
    }
}
