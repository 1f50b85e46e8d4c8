//! Local SOCKS5 proxy
//!
//! Provides:
//! - the per-connection session driving handshake and relay
//! - the lifecycle supervisor that tears both sockets down exactly once
//! - the accept loop spawning one session per inbound connection

mod lifecycle;
mod server;
mod session;

pub use lifecycle::{CloseReason, Lifecycle};
pub use server::LocalServer;
pub use session::{Session, SessionConfig, SessionHandle};

use crate::protocol::{ProtocolError, ATYP_DOMAIN, ATYP_IPV4};
use std::fmt;
use std::net::Ipv4Addr;

/// Address types accepted in a CONNECT request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum AddressType {
    Ipv4 = ATYP_IPV4,
    Domain = ATYP_DOMAIN,
}

impl TryFrom<u8> for AddressType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            ATYP_IPV4 => Ok(AddressType::Ipv4),
            ATYP_DOMAIN => Ok(AddressType::Domain),
            // IPv6 (0x04) included
            _ => Err(ProtocolError::UnsupportedAddressType(value)),
        }
    }
}

/// Proxy target address
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Address {
    /// IPv4 address and port
    Ipv4(Ipv4Addr, u16),
    /// Domain name and port
    Domain(String, u16),
}

impl Address {
    /// Get the port
    pub fn port(&self) -> u16 {
        match self {
            Address::Ipv4(_, port) => *port,
            Address::Domain(_, port) => *port,
        }
    }

    pub fn address_type(&self) -> AddressType {
        match self {
            Address::Ipv4(..) => AddressType::Ipv4,
            Address::Domain(..) => AddressType::Domain,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Address::Ipv4(ip, port) => write!(f, "{}:{}", ip, port),
            Address::Domain(domain, port) => write!(f, "{}:{}", domain, port),
        }
    }
}
