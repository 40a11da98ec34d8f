//! Hashing primitives for ShardPipe
//!
//! Provides:
//! - Blake2b-256/512 and SHA-256/512 digests
//! - Keyed variants (Blake2b MAC, HMAC-SHA2) when a private key is given
//! - A process-wide registry mapping case-insensitive names to constructors
//!
//! Hashers are not shared between tasks. Every worker builds its own
//! through a [`HasherConstructor`].

use crate::error::{Result, ShardPipeError};
use blake2::digest::consts::{U32, U64};
use blake2::digest::{Digest, KeyInit, Mac};
use blake2::{Blake2b, Blake2bMac};
use hmac::Hmac;
use parking_lot::RwLock;
use sha2::{Sha256, Sha512};
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};

/// Computes a digest (or MAC) over a byte slice
pub trait Hasher: Send {
    fn hash(&mut self, data: &[u8]) -> Vec<u8>;
}

/// Builds a fresh hasher for a single worker
pub type HasherConstructor = Arc<dyn Fn() -> Result<Box<dyn Hasher>> + Send + Sync>;

/// Builds a hasher from an optional private key
pub type HasherFactory = Arc<dyn Fn(Option<&[u8]>) -> Result<Box<dyn Hasher>> + Send + Sync>;

/// Built-in hash algorithms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HashType {
    #[default]
    Blake2b256,
    Blake2b512,
    Sha256,
    Sha512,
}

impl HashType {
    pub const ALL: [HashType; 4] = [
        HashType::Blake2b256,
        HashType::Blake2b512,
        HashType::Sha256,
        HashType::Sha512,
    ];

    /// Registry name of this algorithm
    pub fn name(&self) -> &'static str {
        match self {
            HashType::Blake2b256 => "blake2b_256",
            HashType::Blake2b512 => "blake2b_512",
            HashType::Sha256 => "sha_256",
            HashType::Sha512 => "sha_512",
        }
    }

    /// Digest length in bytes
    pub fn output_size(&self) -> usize {
        match self {
            HashType::Blake2b256 | HashType::Sha256 => 32,
            HashType::Blake2b512 | HashType::Sha512 => 64,
        }
    }

    fn build(self, key: Option<&[u8]>) -> Result<Box<dyn Hasher>> {
        match (self, key) {
            (HashType::Blake2b256, None) => Ok(Box::new(DigestHasher::<Blake2b<U32>>::new())),
            (HashType::Blake2b512, None) => Ok(Box::new(DigestHasher::<Blake2b<U64>>::new())),
            (HashType::Sha256, None) => Ok(Box::new(DigestHasher::<Sha256>::new())),
            (HashType::Sha512, None) => Ok(Box::new(DigestHasher::<Sha512>::new())),
            (HashType::Blake2b256, Some(key)) => Ok(Box::new(MacHasher::<Blake2bMac<U32>>::new(key)?)),
            (HashType::Blake2b512, Some(key)) => Ok(Box::new(MacHasher::<Blake2bMac<U64>>::new(key)?)),
            (HashType::Sha256, Some(key)) => Ok(Box::new(MacHasher::<Hmac<Sha256>>::new(key)?)),
            (HashType::Sha512, Some(key)) => Ok(Box::new(MacHasher::<Hmac<Sha512>>::new(key)?)),
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashType {
    type Err = ShardPipeError;

    fn from_str(s: &str) -> Result<Self> {
        let name = normalize(s);
        HashType::ALL
            .into_iter()
            .find(|t| t.name() == name)
            .ok_or_else(|| ShardPipeError::Configuration(format!("unknown hash type: {}", s)))
    }
}

/// Plain digest
struct DigestHasher<D> {
    _digest: PhantomData<fn() -> D>,
}

impl<D: Digest> DigestHasher<D> {
    fn new() -> Self {
        Self {
            _digest: PhantomData,
        }
    }
}

impl<D: Digest> Hasher for DigestHasher<D> {
    fn hash(&mut self, data: &[u8]) -> Vec<u8> {
        D::digest(data).to_vec()
    }
}

/// Keyed digest; the keyed state is cloned for every message
struct MacHasher<M> {
    keyed: M,
}

impl<M: Mac + KeyInit> MacHasher<M> {
    fn new(key: &[u8]) -> Result<Self> {
        let keyed = <M as KeyInit>::new_from_slice(key)
            .map_err(|_| ShardPipeError::InvalidKeyLength(key.len()))?;
        Ok(Self { keyed })
    }
}

impl<M: Mac + Clone + Send> Hasher for MacHasher<M> {
    fn hash(&mut self, data: &[u8]) -> Vec<u8> {
        let mut mac = self.keyed.clone();
        Mac::update(&mut mac, data);
        mac.finalize().into_bytes().to_vec()
    }
}

fn normalize(name: &str) -> String {
    name.trim().to_ascii_lowercase().replace('-', "_")
}

fn registry() -> &'static RwLock<HashMap<String, HasherFactory>> {
    static REGISTRY: OnceLock<RwLock<HashMap<String, HasherFactory>>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut factories: HashMap<String, HasherFactory> = HashMap::new();
        for hash_type in HashType::ALL {
            factories.insert(
                hash_type.name().to_string(),
                Arc::new(move |key| hash_type.build(key)),
            );
        }
        RwLock::new(factories)
    })
}

/// Register (or replace) a hash algorithm under the given name.
pub fn register_hasher(name: &str, factory: HasherFactory) {
    registry().write().insert(normalize(name), factory);
}

/// Names of every registered hash algorithm, sorted.
pub fn registered_hashers() -> Vec<String> {
    let mut names: Vec<String> = registry().read().keys().cloned().collect();
    names.sort();
    names
}

/// Create a hasher by registry name.
///
/// An empty name selects Blake2b-256. An empty key selects the unkeyed digest.
pub fn new_hasher(name: &str, key: &[u8]) -> Result<Box<dyn Hasher>> {
    let name = if name.trim().is_empty() {
        HashType::default().name().to_string()
    } else {
        normalize(name)
    };
    let factory = registry()
        .read()
        .get(&name)
        .cloned()
        .ok_or_else(|| ShardPipeError::Configuration(format!("unknown hash type: {}", name)))?;
    let key = if key.is_empty() { None } else { Some(key) };
    factory(key)
}

/// Create a constructor that builds a new hasher on every call.
pub fn hasher_constructor(name: impl Into<String>, key: impl Into<Vec<u8>>) -> HasherConstructor {
    let name = name.into();
    let key = key.into();
    Arc::new(move || new_hasher(&name, &key))
}

/// Unkeyed Blake2b-256 digest
pub fn sum_256(data: &[u8]) -> Vec<u8> {
    Blake2b::<U32>::digest(data).to_vec()
}

/// Unkeyed Blake2b-512 digest
pub fn sum_512(data: &[u8]) -> Vec<u8> {
    Blake2b::<U64>::digest(data).to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_sizes() {
        for hash_type in HashType::ALL {
            let mut plain = new_hasher(hash_type.name(), b"").unwrap();
            assert_eq!(plain.hash(b"data").len(), hash_type.output_size());

            let mut keyed = new_hasher(hash_type.name(), b"0123456789abcdef").unwrap();
            assert_eq!(keyed.hash(b"data").len(), hash_type.output_size());
        }
    }

    #[test]
    fn test_deterministic() {
        let mut a = new_hasher("blake2b_256", b"secret").unwrap();
        let mut b = new_hasher("blake2b_256", b"secret").unwrap();
        let first = a.hash(b"hello world");
        assert_eq!(first, a.hash(b"hello world"));
        assert_eq!(first, b.hash(b"hello world"));
        assert_ne!(first, a.hash(b"hello world!"));
    }

    #[test]
    fn test_key_changes_digest() {
        let mut plain = new_hasher("sha_256", b"").unwrap();
        let mut keyed = new_hasher("sha_256", b"key").unwrap();
        let mut other = new_hasher("sha_256", b"other key").unwrap();

        let p = plain.hash(b"payload");
        let k = keyed.hash(b"payload");
        assert_ne!(p, k);
        assert_ne!(k, other.hash(b"payload"));
        assert_eq!(p, Sha256::digest(b"payload").to_vec());
    }

    #[test]
    fn test_names_are_case_insensitive() {
        assert_eq!("BLAKE2B_512".parse::<HashType>().unwrap(), HashType::Blake2b512);
        assert_eq!("Sha-256".parse::<HashType>().unwrap(), HashType::Sha256);
        assert!("md5".parse::<HashType>().is_err());

        let mut upper = new_hasher("SHA_512", b"").unwrap();
        let mut lower = new_hasher("sha_512", b"").unwrap();
        assert_eq!(upper.hash(b"x"), lower.hash(b"x"));
    }

    #[test]
    fn test_default_is_blake2b_256() {
        let mut hasher = new_hasher("", b"").unwrap();
        assert_eq!(hasher.hash(b"abc"), sum_256(b"abc"));
    }

    #[test]
    fn test_unknown_hasher() {
        assert!(matches!(
            new_hasher("crc32", b""),
            Err(ShardPipeError::Configuration(_))
        ));
    }

    #[test]
    fn test_blake2b_key_too_long() {
        let key = [7u8; 65];
        assert!(matches!(
            new_hasher("blake2b_256", &key),
            Err(ShardPipeError::InvalidKeyLength(65))
        ));
    }

    #[test]
    fn test_register_custom_hasher() {
        struct Length;
        impl Hasher for Length {
            fn hash(&mut self, data: &[u8]) -> Vec<u8> {
                (data.len() as u64).to_be_bytes().to_vec()
            }
        }

        register_hasher("Test-Length", Arc::new(|_| Ok(Box::new(Length))));
        assert!(registered_hashers().contains(&"test_length".to_string()));

        let mut hasher = new_hasher("test_length", b"").unwrap();
        assert_eq!(hasher.hash(b"abcd"), 4u64.to_be_bytes().to_vec());
    }

    #[test]
    fn test_constructor_builds_independent_hashers() {
        let constructor = hasher_constructor("blake2b_512", b"key".to_vec());
        let mut a = constructor().unwrap();
        let mut b = constructor().unwrap();
        assert_eq!(a.hash(b"same"), b.hash(b"same"));
        assert_eq!(sum_512(b"same").len(), 64);
    }
}
