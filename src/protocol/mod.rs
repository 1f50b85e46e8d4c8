//! Protocol definitions and constants
//!
//! The local side speaks the CONNECT subset of SOCKS5 (RFC 1928) without
//! authentication. The remote side receives a shadowsocks-style address
//! header followed by the (optionally one-time-authenticated) stream.

mod buffer;
mod handshake;

pub use buffer::FramedBuffer;
pub use handshake::{Action, ConnectRequest, Handshake, Stage};

use std::time::Duration;
use thiserror::Error;

/// Protocol errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid SOCKS version: {0}")]
    InvalidSocksVersion(u8),

    #[error("Unsupported command: {0}")]
    UnsupportedCommand(u8),

    #[error("Address type not supported: {0}")]
    UnsupportedAddressType(u8),
}

/// SOCKS version spoken on the local side
pub const SOCKS_VERSION: u8 = 0x05;

/// "No authentication required" method
pub const METHOD_NO_AUTH: u8 = 0x00;

/// CONNECT command, the only one supported
pub const CMD_CONNECT: u8 = 0x01;

/// IPv4 address type
pub const ATYP_IPV4: u8 = 0x01;

/// Domain name address type
pub const ATYP_DOMAIN: u8 = 0x03;

/// Flag OR'd into the upstream address type when one-time auth is on
pub const OTA_FLAG: u8 = 0x10;

/// Length of a one-time auth tag
pub const OTA_TAG_LEN: usize = 10;

/// Largest plaintext payload forwarded upstream in one chunk
pub const MAX_CHUNK_SIZE: usize = 65536;

/// Upstream connect timeout
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Method selection reply sent after the greeting
pub const GREETING_REPLY: [u8; 2] = [SOCKS_VERSION, METHOD_NO_AUTH];

/// CONNECT success reply. The bound address is always the placeholder
/// 0.0.0.0:1; the real upstream address is never disclosed to the client.
pub const CONNECT_REPLY: [u8; 10] = [
    SOCKS_VERSION,
    0x00,
    0x00,
    ATYP_IPV4,
    0x00,
    0x00,
    0x00,
    0x00,
    0x00,
    0x01,
];
