//! Receive buffer for the handshake parser

use bytes::{Buf, BytesMut};

/// Bytes received from the local socket but not yet consumed by the parser.
///
/// Parsed prefixes are dropped with [`FramedBuffer::compact`] or
/// [`FramedBuffer::consume`]; both are O(1) on the underlying `BytesMut`.
#[derive(Debug, Default)]
pub struct FramedBuffer {
    inner: BytesMut,
}

impl FramedBuffer {
    /// Create an empty buffer
    pub fn new() -> Self {
        Self {
            inner: BytesMut::with_capacity(4096),
        }
    }

    /// Append received bytes to the tail
    pub fn append(&mut self, data: &[u8]) {
        self.inner.extend_from_slice(data);
    }

    /// Keep only `[start, end)`, discarding everything before and after.
    ///
    /// # Panics
    /// If `start > end` or `end > len()`.
    pub fn compact(&mut self, start: usize, end: usize) {
        assert!(
            start <= end && end <= self.inner.len(),
            "compact range {}..{} out of bounds for buffer of length {}",
            start,
            end,
            self.inner.len()
        );
        self.inner.truncate(end);
        self.inner.advance(start);
    }

    /// Drop the first `n` bytes
    pub fn consume(&mut self, n: usize) {
        let len = self.inner.len();
        self.compact(n, len);
    }

    /// Split off and return the first `n` bytes
    pub fn split_to(&mut self, n: usize) -> BytesMut {
        self.inner.split_to(n)
    }

    /// Discard everything
    pub fn clear(&mut self) {
        self.inner.clear();
    }

    /// Current number of unconsumed bytes
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.inner
    }
}
