//! One-time authentication
//!
//! The upstream header is authenticated with a key of `iv || cipher key`;
//! every data chunk with `iv || chunk counter (u32 BE)`. Tags are the first
//! 10 bytes of HMAC-SHA1.

use crate::protocol::OTA_TAG_LEN;
use ring::hmac;
use thiserror::Error;

/// Authentication errors
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("Invalid authentication key: {0}")]
    InvalidKey(&'static str),
}

/// Per-use key material appended to the IV
#[derive(Debug, Clone, Copy)]
pub enum KeyMaterial<'a> {
    /// Chunk counter, encoded big-endian
    Counter(u32),
    /// Raw bytes, e.g. the symmetric cipher key
    Bytes(&'a [u8]),
}

/// Build an authentication key from the encrypt-direction IV and key material
pub fn prepare_key(iv: &[u8], material: KeyMaterial<'_>) -> Vec<u8> {
    let mut key = iv.to_vec();
    match material {
        KeyMaterial::Counter(count) => key.extend_from_slice(&count.to_be_bytes()),
        KeyMaterial::Bytes(bytes) => key.extend_from_slice(bytes),
    }
    key
}

/// Keyed-hash authenticator producing truncated tags
pub trait Authenticator: Send + Sync {
    fn do_auth(&self, key: &[u8], data: &[u8]) -> Result<[u8; OTA_TAG_LEN], AuthError>;
}

/// HMAC-SHA1 truncated to [`OTA_TAG_LEN`] bytes
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacSha1;

impl Authenticator for HmacSha1 {
    fn do_auth(&self, key: &[u8], data: &[u8]) -> Result<[u8; OTA_TAG_LEN], AuthError> {
        if key.is_empty() {
            return Err(AuthError::InvalidKey("empty key"));
        }
        let key = hmac::Key::new(hmac::HMAC_SHA1_FOR_LEGACY_USE_ONLY, key);
        let tag = hmac::sign(&key, data);

        let mut out = [0u8; OTA_TAG_LEN];
        out.copy_from_slice(&tag.as_ref()[..OTA_TAG_LEN]);
        Ok(out)
    }
}
