//! # Shadowline
//!
//! Local SOCKS5 front end for an encrypted stream proxy.
//!
//! Each accepted client speaks a minimal SOCKS5 handshake (no-auth, CONNECT,
//! IPv4 or domain targets). The destination is then forwarded as a compact
//! header over a single encrypted connection to the upstream proxy, followed
//! by the client's data. Traffic is encrypted with a stream cipher and can be
//! authenticated per chunk with HMAC-SHA1 one-time auth.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐   SOCKS5   ┌───────────────────────────┐  encrypted  ┌──────────┐
//! │ local client │ ─────────► │ Session                    │ ──────────► │ upstream │
//! │              │ ◄───────── │  Handshake → Connector     │ ◄────────── │  proxy   │
//! └──────────────┘            │  Lifecycle (teardown once) │             └──────────┘
//!                             └───────────────────────────┘
//! ```

pub mod config;
pub mod crypto;
pub mod protocol;
pub mod proxy;
pub mod transport;

pub use config::Config;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Crypto error: {0}")]
    Crypto(#[from] crypto::CryptoError),

    #[error("Auth error: {0}")]
    Auth(#[from] crypto::AuthError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] protocol::ProtocolError),

    #[error("Transport error: {0}")]
    Transport(#[from] transport::TransportError),

    #[error("Configuration error: {0}")]
    Config(String),
}
