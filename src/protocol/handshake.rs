//! Incremental SOCKS5 handshake state machine
//!
//! Input arrives in arbitrary-sized chunks. Every chunk is appended to the
//! receive buffer and the current stage handler runs on whatever is buffered.
//! A handler either waits for more data, advances, or fails. After an advance
//! the next handler runs on the leftover bytes in the same call, so a
//! greeting and a request sent back-to-back are handled together.
//!
//! ```text
//! Hello ──► Header ──► Address ──► Data ◄─┐
//!   │         │           │         └─────┘
//!   └─────────┴───────────┴──► Destroy (on error)
//! ```

use super::{
    FramedBuffer, ProtocolError, CMD_CONNECT, GREETING_REPLY, MAX_CHUNK_SIZE, OTA_FLAG,
    SOCKS_VERSION,
};
use crate::proxy::{Address, AddressType};
use bytes::{BufMut, Bytes, BytesMut};
use std::net::Ipv4Addr;
use tracing::{debug, warn};

/// The greeting is not answered until this many bytes are buffered
const MIN_GREETING_LEN: usize = 3;

/// Handshake stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Waiting for the method greeting
    Hello,
    /// Waiting for the request header
    Header,
    /// Waiting for the destination address and port
    Address,
    /// Forwarding payload upstream
    Data,
    /// Session torn down, input is discarded
    Destroy,
}

/// Request to open the upstream connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Destination requested by the client
    pub target: Address,
    /// Plaintext upstream address header, without the one-time auth tag
    pub header: Bytes,
}

/// Side effect produced while parsing, executed in order by the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Write these bytes to the local socket
    Reply(Bytes),
    /// Open the upstream connection and send the header
    Connect(ConnectRequest),
    /// Send one payload chunk upstream
    Forward(Bytes),
}

/// Internal parser state. The address stage carries the type recorded by
/// the header stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Hello,
    Header,
    Address(AddressType),
    Data,
    Destroy,
}

impl State {
    fn stage(self) -> Stage {
        match self {
            State::Hello => Stage::Hello,
            State::Header => Stage::Header,
            State::Address(_) => Stage::Address,
            State::Data => Stage::Data,
            State::Destroy => Stage::Destroy,
        }
    }
}

/// Outcome of a single stage handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    NeedMore,
    Advance(State),
}

/// Per-session handshake parser
#[derive(Debug)]
pub struct Handshake {
    state: State,
    buffer: FramedBuffer,
    one_time_auth: bool,
    max_chunk: usize,
}

impl Handshake {
    pub fn new(one_time_auth: bool) -> Self {
        Self {
            state: State::Hello,
            buffer: FramedBuffer::new(),
            one_time_auth,
            // One-time auth frames carry a u16 length
            max_chunk: if one_time_auth {
                u16::MAX as usize
            } else {
                MAX_CHUNK_SIZE
            },
        }
    }

    /// Current stage
    pub fn stage(&self) -> Stage {
        self.state.stage()
    }

    /// Number of received bytes not yet consumed
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Enter the terminal stage and drop any buffered input
    pub fn destroy(&mut self) {
        self.state = State::Destroy;
        self.buffer.clear();
    }

    /// Append input without parsing it. The next [`feed`](Self::feed) call
    /// processes it ahead of the new data.
    pub fn stash(&mut self, data: &[u8]) {
        if self.state != State::Destroy {
            self.buffer.append(data);
        }
    }

    /// Feed one inbound chunk.
    ///
    /// Actions are pushed onto `actions` in the order they must be executed.
    /// On error the actions produced before the failure are kept, the
    /// handshake enters [`Stage::Destroy`] and the caller must tear the
    /// session down.
    pub fn feed(&mut self, data: &[u8], actions: &mut Vec<Action>) -> Result<(), ProtocolError> {
        if self.state == State::Destroy {
            return Ok(());
        }
        self.buffer.append(data);

        loop {
            let step = match self.state {
                State::Hello => self.handle_hello(actions),
                State::Header => self.handle_header(),
                State::Address(address_type) => self.handle_address(address_type, actions),
                State::Data => self.handle_data(actions),
                State::Destroy => Ok(Step::NeedMore),
            };

            match step {
                Ok(Step::Advance(next)) => {
                    self.state = next;
                    if self.buffer.is_empty() {
                        break;
                    }
                }
                Ok(Step::NeedMore) => break,
                Err(e) => {
                    warn!("Handshake failed in {:?} stage: {}", self.stage(), e);
                    self.destroy();
                    return Err(e);
                }
            }
        }

        Ok(())
    }

    /// `[VER][NMETHODS][METHODS...]`, never answered before 3 bytes are in
    fn handle_hello(&mut self, actions: &mut Vec<Action>) -> Result<Step, ProtocolError> {
        let buf = self.buffer.as_slice();
        let Some(&version) = buf.first() else {
            return Ok(Step::NeedMore);
        };
        if version != SOCKS_VERSION {
            return Err(ProtocolError::InvalidSocksVersion(version));
        }
        let Some(&nmethods) = buf.get(1) else {
            return Ok(Step::NeedMore);
        };
        let greeting_len = 2 + nmethods as usize;
        if buf.len() < greeting_len.max(MIN_GREETING_LEN) {
            return Ok(Step::NeedMore);
        }

        // The method list is discarded; only "no auth" is ever offered.
        // Bytes past the greeting belong to the request.
        self.buffer.consume(greeting_len);
        actions.push(Action::Reply(Bytes::from_static(&GREETING_REPLY)));
        Ok(Step::Advance(State::Header))
    }

    /// `[VER][CMD][RSV][ATYP]`
    fn handle_header(&mut self) -> Result<Step, ProtocolError> {
        let buf = self.buffer.as_slice();
        if buf.len() < 4 {
            return Ok(Step::NeedMore);
        }
        // BIND and UDP ASSOCIATE are not supported
        if buf[1] != CMD_CONNECT {
            return Err(ProtocolError::UnsupportedCommand(buf[1]));
        }
        let address_type = AddressType::try_from(buf[3])?;
        self.buffer.consume(4);
        Ok(Step::Advance(State::Address(address_type)))
    }

    /// `[ADDR][PORT]`, where ADDR is 4 raw bytes or `[LEN][NAME...]`
    fn handle_address(
        &mut self,
        address_type: AddressType,
        actions: &mut Vec<Action>,
    ) -> Result<Step, ProtocolError> {
        let buf = self.buffer.as_slice();

        let addr_len = match address_type {
            AddressType::Ipv4 => 4,
            AddressType::Domain => match buf.first() {
                Some(&len) => 1 + len as usize,
                None => return Ok(Step::NeedMore),
            },
        };
        if buf.len() < addr_len + 2 {
            return Ok(Step::NeedMore);
        }

        let raw_addr = &buf[..addr_len];
        let port = u16::from_be_bytes([buf[addr_len], buf[addr_len + 1]]);
        let target = match address_type {
            AddressType::Ipv4 => Address::Ipv4(
                Ipv4Addr::new(raw_addr[0], raw_addr[1], raw_addr[2], raw_addr[3]),
                port,
            ),
            AddressType::Domain => {
                Address::Domain(String::from_utf8_lossy(&raw_addr[1..]).into_owned(), port)
            }
        };

        let mut atyp = address_type as u8;
        if self.one_time_auth {
            atyp |= OTA_FLAG;
        }
        let mut header = BytesMut::with_capacity(1 + addr_len + 2);
        header.put_u8(atyp);
        header.put_slice(raw_addr);
        header.put_u16(port);

        self.buffer.consume(addr_len + 2);

        debug!("CONNECT request for {}", target);
        actions.push(Action::Connect(ConnectRequest {
            target,
            header: header.freeze(),
        }));
        Ok(Step::Advance(State::Data))
    }

    fn handle_data(&mut self, actions: &mut Vec<Action>) -> Result<Step, ProtocolError> {
        while !self.buffer.is_empty() {
            let end = self.buffer.len().min(self.max_chunk);
            actions.push(Action::Forward(self.buffer.split_to(end).freeze()));
        }
        Ok(Step::NeedMore)
    }
}
