use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha256};

pub const HASH_SIZE: usize = 32;

/// Fixed-width 32 byte digest used for commitments, essence hashes and entropy.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct HashValue(pub [u8; HASH_SIZE]);

pub const NIL_HASH: HashValue = HashValue([0u8; HASH_SIZE]);

pub trait Hashable {
    fn hash(&self) -> HashValue;
}

impl HashValue {
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != HASH_SIZE {
            return None;
        }
        let mut out = [0u8; HASH_SIZE];
        out.copy_from_slice(bytes);
        Some(HashValue(out))
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl AsRef<[u8]> for HashValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HashValue({})", self.short())
    }
}

/// Hashes the concatenation of `parts`.
pub fn hash_data(parts: &[&[u8]]) -> HashValue {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    finish(hasher)
}

pub(crate) fn finish(hasher: Sha256) -> HashValue {
    let result = hasher.finalize();
    let mut digest = [0u8; HASH_SIZE];
    digest.copy_from_slice(&result[..]);
    HashValue(digest)
}

/// Folds `next` into a running commitment: `H(prev || next)`.
pub fn fold(prev: &HashValue, next: &HashValue) -> HashValue {
    hash_data(&[prev.as_ref(), next.as_ref()])
}
