//! Key Derivation Functions
//!
//! Provides OpenSSL's EVP_BytesToKey (MD5, one iteration, no salt), which is
//! how stream-cipher keys are derived from the configured password.

use md5::{Digest, Md5};

/// Derive a `key_len`-byte key from a password.
///
/// `D_1 = MD5(password)`, `D_i = MD5(D_{i-1} || password)`; the key is the
/// concatenation `D_1 || D_2 || ...` truncated to `key_len`.
pub fn evp_bytes_to_key(password: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len + 16);
    let mut prev: Vec<u8> = Vec::new();

    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&prev);
        hasher.update(password);
        prev = hasher.finalize().to_vec();
        key.extend_from_slice(&prev);
    }

    key.truncate(key_len);
    key
}
