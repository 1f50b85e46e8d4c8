//! Stream cipher state for the upstream link
//!
//! Each direction has its own IV. The encrypt side generates a random IV and
//! prepends it to the first ciphertext it emits; the decrypt side takes the
//! peer's IV from the first bytes it receives, which may arrive split across
//! several reads.

use super::{evp_bytes_to_key, random_bytes, CryptoError};
use aes::{Aes128, Aes192, Aes256};
use cfb_mode::{BufDecryptor, BufEncryptor};
use chacha20::{ChaCha20, ChaCha20Legacy};
use ::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use std::fmt;
use std::str::FromStr;

/// Supported cipher methods
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Aes128Cfb,
    Aes192Cfb,
    Aes256Cfb,
    Aes128Ctr,
    Aes192Ctr,
    Aes256Ctr,
    ChaCha20,
    ChaCha20Ietf,
}

impl Method {
    /// All supported methods
    pub const ALL: [Method; 8] = [
        Method::Aes128Cfb,
        Method::Aes192Cfb,
        Method::Aes256Cfb,
        Method::Aes128Ctr,
        Method::Aes192Ctr,
        Method::Aes256Ctr,
        Method::ChaCha20,
        Method::ChaCha20Ietf,
    ];

    /// Configuration name of the method
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Aes128Cfb => "aes-128-cfb",
            Method::Aes192Cfb => "aes-192-cfb",
            Method::Aes256Cfb => "aes-256-cfb",
            Method::Aes128Ctr => "aes-128-ctr",
            Method::Aes192Ctr => "aes-192-ctr",
            Method::Aes256Ctr => "aes-256-ctr",
            Method::ChaCha20 => "chacha20",
            Method::ChaCha20Ietf => "chacha20-ietf",
        }
    }

    /// Symmetric key length in bytes
    pub fn key_len(&self) -> usize {
        match self {
            Method::Aes128Cfb | Method::Aes128Ctr => 16,
            Method::Aes192Cfb | Method::Aes192Ctr => 24,
            Method::Aes256Cfb | Method::Aes256Ctr => 32,
            Method::ChaCha20 | Method::ChaCha20Ietf => 32,
        }
    }

    /// IV length in bytes
    pub fn iv_len(&self) -> usize {
        match self {
            Method::ChaCha20 => 8,
            Method::ChaCha20Ietf => 12,
            _ => 16,
        }
    }
}

impl FromStr for Method {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Method::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CryptoError::UnsupportedMethod(s.to_string()))
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Keystream state for one direction
enum Keystream {
    Aes128CfbEnc(BufEncryptor<Aes128>),
    Aes192CfbEnc(BufEncryptor<Aes192>),
    Aes256CfbEnc(BufEncryptor<Aes256>),
    Aes128CfbDec(BufDecryptor<Aes128>),
    Aes192CfbDec(BufDecryptor<Aes192>),
    Aes256CfbDec(BufDecryptor<Aes256>),
    Aes128Ctr(Ctr128BE<Aes128>),
    Aes192Ctr(Ctr128BE<Aes192>),
    Aes256Ctr(Ctr128BE<Aes256>),
    ChaCha20(ChaCha20Legacy),
    ChaCha20Ietf(ChaCha20),
}

impl Keystream {
    fn new(method: Method, key: &[u8], iv: &[u8], encrypt: bool) -> Result<Self, CryptoError> {
        let invalid = |_| CryptoError::InvalidLength(method);
        let state = match (method, encrypt) {
            (Method::Aes128Cfb, true) => {
                Keystream::Aes128CfbEnc(BufEncryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes192Cfb, true) => {
                Keystream::Aes192CfbEnc(BufEncryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes256Cfb, true) => {
                Keystream::Aes256CfbEnc(BufEncryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes128Cfb, false) => {
                Keystream::Aes128CfbDec(BufDecryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes192Cfb, false) => {
                Keystream::Aes192CfbDec(BufDecryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes256Cfb, false) => {
                Keystream::Aes256CfbDec(BufDecryptor::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes128Ctr, _) => {
                Keystream::Aes128Ctr(Ctr128BE::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes192Ctr, _) => {
                Keystream::Aes192Ctr(Ctr128BE::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::Aes256Ctr, _) => {
                Keystream::Aes256Ctr(Ctr128BE::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::ChaCha20, _) => {
                Keystream::ChaCha20(ChaCha20Legacy::new_from_slices(key, iv).map_err(invalid)?)
            }
            (Method::ChaCha20Ietf, _) => {
                Keystream::ChaCha20Ietf(ChaCha20::new_from_slices(key, iv).map_err(invalid)?)
            }
        };
        Ok(state)
    }

    /// Transform `data` in place, continuing the keystream
    fn apply(&mut self, data: &mut [u8]) {
        match self {
            Keystream::Aes128CfbEnc(c) => c.encrypt(data),
            Keystream::Aes192CfbEnc(c) => c.encrypt(data),
            Keystream::Aes256CfbEnc(c) => c.encrypt(data),
            Keystream::Aes128CfbDec(c) => c.decrypt(data),
            Keystream::Aes192CfbDec(c) => c.decrypt(data),
            Keystream::Aes256CfbDec(c) => c.decrypt(data),
            Keystream::Aes128Ctr(c) => c.apply_keystream(data),
            Keystream::Aes192Ctr(c) => c.apply_keystream(data),
            Keystream::Aes256Ctr(c) => c.apply_keystream(data),
            Keystream::ChaCha20(c) => c.apply_keystream(data),
            Keystream::ChaCha20Ietf(c) => c.apply_keystream(data),
        }
    }
}

/// Encrypt direction of a connection's cipher
pub struct Encryptor {
    key: Vec<u8>,
    iv: Vec<u8>,
    state: Keystream,
    iv_sent: bool,
}

impl Encryptor {
    /// Create an encryptor with an explicit IV
    pub fn new(method: Method, key: &[u8], iv: &[u8]) -> Result<Self, CryptoError> {
        Ok(Self {
            key: key.to_vec(),
            iv: iv.to_vec(),
            state: Keystream::new(method, key, iv, true)?,
            iv_sent: false,
        })
    }

    /// Create an encryptor with a fresh random IV
    pub fn with_random_iv(method: Method, key: &[u8]) -> Result<Self, CryptoError> {
        let mut iv = vec![0u8; method.iv_len()];
        random_bytes(&mut iv)?;
        Self::new(method, key, &iv)
    }

    /// Encrypt `data`. The first call prepends the IV.
    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let prefix = if self.iv_sent { 0 } else { self.iv.len() };
        let mut out = Vec::with_capacity(prefix + data.len());
        if !self.iv_sent {
            out.extend_from_slice(&self.iv);
            self.iv_sent = true;
        }
        out.extend_from_slice(data);
        self.state.apply(&mut out[prefix..]);
        Ok(out)
    }

    pub fn iv(&self) -> &[u8] {
        &self.iv
    }

    pub fn key(&self) -> &[u8] {
        &self.key
    }
}

/// Decrypt direction of a connection's cipher
pub struct Decryptor {
    method: Method,
    key: Vec<u8>,
    iv: Vec<u8>,
    state: Option<Keystream>,
}

impl Decryptor {
    pub fn new(method: Method, key: &[u8]) -> Self {
        Self {
            method,
            key: key.to_vec(),
            iv: Vec::with_capacity(method.iv_len()),
            state: None,
        }
    }

    /// Decrypt `data`. Leading bytes are taken as the peer's IV until it is
    /// complete, so the output may be shorter than the input or empty.
    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut data = data;
        if self.state.is_none() {
            let missing = self.method.iv_len() - self.iv.len();
            let take = missing.min(data.len());
            self.iv.extend_from_slice(&data[..take]);
            data = &data[take..];

            if self.iv.len() < self.method.iv_len() {
                return Ok(Vec::new());
            }
            self.state = Some(Keystream::new(self.method, &self.key, &self.iv, false)?);
        }

        let mut out = data.to_vec();
        if let Some(state) = self.state.as_mut() {
            state.apply(&mut out);
        }
        Ok(out)
    }

    /// Peer's IV, once fully received
    pub fn iv(&self) -> Option<&[u8]> {
        self.state.as_ref().map(|_| self.iv.as_slice())
    }
}

/// Both directions of a connection's cipher
pub struct Crypto {
    method: Method,
    encryptor: Encryptor,
    decryptor: Decryptor,
}

impl Crypto {
    /// Create a cipher for `method`, deriving the key from `password`
    pub fn new(method: Method, password: &str) -> Result<Self, CryptoError> {
        let key = evp_bytes_to_key(password.as_bytes(), method.key_len());
        Ok(Self {
            method,
            encryptor: Encryptor::with_random_iv(method, &key)?,
            decryptor: Decryptor::new(method, &key),
        })
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.encryptor.encrypt(data)
    }

    pub fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        self.decryptor.decrypt(data)
    }

    /// IV of the encrypt or decrypt direction. The decrypt IV is `None`
    /// until it has been received from the peer.
    pub fn iv(&self, encrypt: bool) -> Option<&[u8]> {
        if encrypt {
            Some(self.encryptor.iv())
        } else {
            self.decryptor.iv()
        }
    }

    pub fn key(&self) -> &[u8] {
        self.encryptor.key()
    }

    /// Split into independently owned directions
    pub fn into_parts(self) -> (Encryptor, Decryptor) {
        (self.encryptor, self.decryptor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLAINTEXT: &[u8] = b"hello shadowline";

    fn unhex(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    fn known_ciphertext(method: Method, expected: &str) {
        let key = evp_bytes_to_key(b"password", method.key_len());
        let iv: Vec<u8> = (0..method.iv_len() as u8).collect();
        let mut enc = Encryptor::new(method, &key, &iv).unwrap();

        let out = enc.encrypt(PLAINTEXT).unwrap();
        assert_eq!(&out[..iv.len()], &iv[..], "{} IV prefix", method);
        assert_eq!(out[iv.len()..], unhex(expected)[..], "{} ciphertext", method);
    }

    #[test]
    fn test_known_vectors() {
        known_ciphertext(Method::Aes128Cfb, "3aec857dbdb00d613822d697a80d14c6");
        known_ciphertext(Method::Aes256Cfb, "bbaee255bce001a44ab075037e12bf27");
        known_ciphertext(Method::Aes192Ctr, "660936a2d6da008013d350e11b6ab880");
        known_ciphertext(Method::ChaCha20, "ceedddfbb32ad29bbc1a316967e7091a");
        known_ciphertext(Method::ChaCha20Ietf, "c8501d29f784963dfb3beda68985e04d");
    }

    #[test]
    fn test_roundtrip_with_split_delivery() {
        for method in Method::ALL {
            let mut sender = Crypto::new(method, "secret").unwrap();
            let mut receiver = Crypto::new(method, "secret").unwrap();

            let mut wire = sender.encrypt(b"first message, ").unwrap();
            wire.extend(sender.encrypt(b"then the rest").unwrap());

            let mut plain = Vec::new();
            for piece in wire.chunks(3) {
                plain.extend(receiver.decrypt(piece).unwrap());
            }
            assert_eq!(plain, b"first message, then the rest", "{}", method);
            assert_eq!(receiver.iv(false), sender.iv(true));
        }
    }

    #[test]
    fn test_iv_only_once() {
        let mut crypto = Crypto::new(Method::Aes256Cfb, "secret").unwrap();
        let first = crypto.encrypt(b"abc").unwrap();
        let second = crypto.encrypt(b"abc").unwrap();
        assert_eq!(first.len(), 16 + 3);
        assert_eq!(second.len(), 3);
    }

    #[test]
    fn test_random_ivs_differ() {
        let a = Crypto::new(Method::Aes128Ctr, "secret").unwrap();
        let b = Crypto::new(Method::Aes128Ctr, "secret").unwrap();
        assert_ne!(a.iv(true), b.iv(true));
        assert_eq!(a.key(), b.key());
        assert!(a.iv(false).is_none());
    }

    #[test]
    fn test_wrong_password_garbles() {
        let mut sender = Crypto::new(Method::Aes128Cfb, "right").unwrap();
        let mut receiver = Crypto::new(Method::Aes128Cfb, "wrong").unwrap();
        let wire = sender.encrypt(PLAINTEXT).unwrap();
        assert_ne!(receiver.decrypt(&wire).unwrap(), PLAINTEXT);
    }

    #[test]
    fn test_method_parsing() {
        assert_eq!("aes-256-cfb".parse::<Method>().unwrap(), Method::Aes256Cfb);
        assert_eq!("CHACHA20-IETF".parse::<Method>().unwrap(), Method::ChaCha20Ietf);
        assert!(matches!(
            "rc4-md5".parse::<Method>(),
            Err(CryptoError::UnsupportedMethod(_))
        ));
    }

    #[test]
    fn test_invalid_iv_length() {
        let key = [0u8; 16];
        assert!(matches!(
            Encryptor::new(Method::Aes128Cfb, &key, &[0u8; 8]),
            Err(CryptoError::InvalidLength(Method::Aes128Cfb))
        ));
    }
}
