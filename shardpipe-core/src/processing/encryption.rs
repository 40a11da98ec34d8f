//! AES-GCM encryption processor
//!
//! Stored layout: `nonce (12 bytes) || ciphertext || tag (16 bytes)`.
//! The key length selects AES-128, AES-192 or AES-256.

use crate::error::{Result, ShardPipeError};
use aes_gcm::aead::consts::U12;
use aes_gcm::aead::{AeadInPlace, KeyInit, OsRng};
use aes_gcm::aes::Aes192;
use aes_gcm::{Aes128Gcm, Aes256Gcm, AesGcm, Nonce, Tag};
use bytes::{Bytes, BytesMut};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// AES-GCM nonce size (12 bytes / 96 bits)
pub const NONCE_SIZE: usize = 12;

/// AES-GCM authentication tag size (16 bytes)
pub const TAG_SIZE: usize = 16;

type Aes192Gcm = AesGcm<Aes192, U12>;

/// Encryption algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EncryptionType {
    /// AES-GCM; the key size follows from the key length
    #[default]
    Aes,
}

impl EncryptionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionType::Aes => "aes",
        }
    }
}

impl fmt::Display for EncryptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EncryptionType {
    type Err = ShardPipeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "" | "aes" | "aes_128" | "aes_192" | "aes_256" => Ok(EncryptionType::Aes),
            _ => Err(ShardPipeError::Configuration(format!(
                "unknown encryption type: {}",
                s
            ))),
        }
    }
}

impl TryFrom<String> for EncryptionType {
    type Error = ShardPipeError;

    fn try_from(s: String) -> Result<Self> {
        s.parse()
    }
}

impl From<EncryptionType> for String {
    fn from(kind: EncryptionType) -> Self {
        kind.as_str().to_string()
    }
}

enum Cipher {
    Aes128(Box<Aes128Gcm>),
    Aes192(Box<Aes192Gcm>),
    Aes256(Box<Aes256Gcm>),
}

impl Cipher {
    fn new(key: &[u8]) -> Result<Self> {
        let invalid = |_| ShardPipeError::InvalidKeyLength(key.len());
        match key.len() {
            16 => Ok(Cipher::Aes128(Box::new(Aes128Gcm::new_from_slice(key).map_err(invalid)?))),
            24 => Ok(Cipher::Aes192(Box::new(Aes192Gcm::new_from_slice(key).map_err(invalid)?))),
            32 => Ok(Cipher::Aes256(Box::new(Aes256Gcm::new_from_slice(key).map_err(invalid)?))),
            n => Err(ShardPipeError::InvalidKeyLength(n)),
        }
    }

    fn key_bits(&self) -> usize {
        match self {
            Cipher::Aes128(_) => 128,
            Cipher::Aes192(_) => 192,
            Cipher::Aes256(_) => 256,
        }
    }

    fn seal(&self, nonce: &[u8], buffer: &mut [u8]) -> std::result::Result<Tag, aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        match self {
            Cipher::Aes128(c) => c.encrypt_in_place_detached(nonce, b"", buffer),
            Cipher::Aes192(c) => c.encrypt_in_place_detached(nonce, b"", buffer),
            Cipher::Aes256(c) => c.encrypt_in_place_detached(nonce, b"", buffer),
        }
    }

    fn open(&self, nonce: &[u8], buffer: &mut [u8], tag: &[u8]) -> std::result::Result<(), aes_gcm::Error> {
        let nonce = Nonce::from_slice(nonce);
        let tag = Tag::from_slice(tag);
        match self {
            Cipher::Aes128(c) => c.decrypt_in_place_detached(nonce, b"", buffer, tag),
            Cipher::Aes192(c) => c.decrypt_in_place_detached(nonce, b"", buffer, tag),
            Cipher::Aes256(c) => c.decrypt_in_place_detached(nonce, b"", buffer, tag),
        }
    }
}

/// Encrypter-decrypter with reusable scratch buffers
pub struct Encrypter {
    cipher: Cipher,
    write_buf: BytesMut,
    read_buf: BytesMut,
}

impl Encrypter {
    /// Create an encrypter; the key must be 16, 24 or 32 bytes long
    pub fn new(kind: EncryptionType, key: &[u8]) -> Result<Self> {
        let cipher = match kind {
            EncryptionType::Aes => Cipher::new(key)?,
        };
        Ok(Self {
            cipher,
            write_buf: BytesMut::new(),
            read_buf: BytesMut::new(),
        })
    }

    /// AES key size in bits
    pub fn key_bits(&self) -> usize {
        self.cipher.key_bits()
    }

    pub fn encrypt(&mut self, plaintext: &[u8]) -> Result<Bytes> {
        let mut nonce = [0u8; NONCE_SIZE];
        OsRng.fill_bytes(&mut nonce);

        self.write_buf.clear();
        self.write_buf.reserve(NONCE_SIZE + plaintext.len() + TAG_SIZE);
        self.write_buf.extend_from_slice(&nonce);
        self.write_buf.extend_from_slice(plaintext);

        let tag = self
            .cipher
            .seal(&nonce, &mut self.write_buf[NONCE_SIZE..])
            .map_err(|_| ShardPipeError::Processing("encryption failed".to_string()))?;
        self.write_buf.extend_from_slice(&tag);

        Ok(self.write_buf.split().freeze())
    }

    pub fn decrypt(&mut self, data: &[u8]) -> Result<Bytes> {
        if data.len() < NONCE_SIZE + TAG_SIZE {
            return Err(ShardPipeError::Processing("malformed ciphertext".to_string()));
        }
        let (nonce, rest) = data.split_at(NONCE_SIZE);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_SIZE);

        self.read_buf.clear();
        self.read_buf.extend_from_slice(ciphertext);
        if self.cipher.open(nonce, &mut self.read_buf, tag).is_err() {
            self.read_buf.clear();
            return Err(ShardPipeError::Processing("authentication failed".to_string()));
        }

        Ok(self.read_buf.split().freeze())
    }
}

impl fmt::Debug for Encrypter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Encrypter(aes_{}, [REDACTED])", self.key_bits())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_sizes() {
        for (len, bits) in [(16, 128), (24, 192), (32, 256)] {
            let key = vec![0x42u8; len];
            let mut e = Encrypter::new(EncryptionType::Aes, &key).unwrap();
            assert_eq!(e.key_bits(), bits);

            let sealed = e.encrypt(b"secret message").unwrap();
            assert_eq!(sealed.len(), NONCE_SIZE + 14 + TAG_SIZE);
            assert_eq!(e.decrypt(&sealed).unwrap().as_ref(), b"secret message");
        }
    }

    #[test]
    fn test_invalid_key_length() {
        assert!(matches!(
            Encrypter::new(EncryptionType::Aes, b"too short"),
            Err(ShardPipeError::InvalidKeyLength(9))
        ));
    }

    #[test]
    fn test_wrong_key_fails() {
        let mut a = Encrypter::new(EncryptionType::Aes, &[1u8; 32]).unwrap();
        let mut b = Encrypter::new(EncryptionType::Aes, &[2u8; 32]).unwrap();
        let sealed = a.encrypt(b"secret").unwrap();
        assert!(b.decrypt(&sealed).unwrap_err().is_integrity_failure());
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let mut e = Encrypter::new(EncryptionType::Aes, &[9u8; 32]).unwrap();
        let mut sealed = e.encrypt(b"secret").unwrap().to_vec();
        sealed[NONCE_SIZE] ^= 0xFF;
        assert!(e.decrypt(&sealed).is_err());
    }

    #[test]
    fn test_malformed_ciphertext() {
        let mut e = Encrypter::new(EncryptionType::Aes, &[9u8; 16]).unwrap();
        let err = e.decrypt(&[0u8; NONCE_SIZE]).unwrap_err();
        assert_eq!(err.to_string(), "Processing error: malformed ciphertext");
    }

    #[test]
    fn test_nonce_is_random() {
        let mut e = Encrypter::new(EncryptionType::Aes, &[3u8; 32]).unwrap();
        let a = e.encrypt(b"same").unwrap();
        let b = e.encrypt(b"same").unwrap();
        assert_ne!(a, b);
        assert_eq!(e.decrypt(&a).unwrap(), e.decrypt(&b).unwrap());
    }

    #[test]
    fn test_empty_plaintext() {
        let mut e = Encrypter::new(EncryptionType::Aes, &[3u8; 24]).unwrap();
        let sealed = e.encrypt(b"").unwrap();
        assert_eq!(sealed.len(), NONCE_SIZE + TAG_SIZE);
        assert!(e.decrypt(&sealed).unwrap().is_empty());
    }

    #[test]
    fn test_debug_redacts_key() {
        let e = Encrypter::new(EncryptionType::Aes, &[3u8; 32]).unwrap();
        assert_eq!(format!("{:?}", e), "Encrypter(aes_256, [REDACTED])");
    }
}
