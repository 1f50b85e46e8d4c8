//! Cryptographic primitives for the upstream link
//!
//! This module provides:
//! - Stream ciphers (AES-CFB, AES-CTR, ChaCha20) with a random IV per direction
//! - EVP_BytesToKey password-based key derivation
//! - HMAC-SHA1 one-time authentication
//! - Secure random number generation

mod auth;
mod kdf;
mod stream;

pub use auth::{prepare_key, AuthError, Authenticator, HmacSha1, KeyMaterial};
pub use kdf::evp_bytes_to_key;
pub use stream::{Crypto, Decryptor, Encryptor, Method};

use thiserror::Error;

/// Cryptographic errors
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Unsupported cipher method: {0}")]
    UnsupportedMethod(String),

    #[error("Invalid key or IV length for {0}")]
    InvalidLength(Method),

    #[error("Random number generation failed")]
    Random,
}

/// Fill `buf` with cryptographically secure random bytes
pub fn random_bytes(buf: &mut [u8]) -> Result<(), CryptoError> {
    use ring::rand::{SecureRandom, SystemRandom};
    let rng = SystemRandom::new();
    rng.fill(buf).map_err(|_| CryptoError::Random)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes() {
        let mut buf1 = [0u8; 32];
        let mut buf2 = [0u8; 32];
        random_bytes(&mut buf1).unwrap();
        random_bytes(&mut buf2).unwrap();
        assert_ne!(buf1, buf2);
    }
}
