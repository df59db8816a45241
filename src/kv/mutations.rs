use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha256};

use crate::common::hashing::{finish, HashValue, Hashable};

pub type Key = Vec<u8>;
pub type Value = Vec<u8>;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Mutation {
    Set { key: Key, value: Value },
    Del { key: Key },
}

impl Mutation {
    pub fn set(key: &[u8], value: &[u8]) -> Self {
        Mutation::Set {
            key: key.to_vec(),
            value: value.to_vec(),
        }
    }

    pub fn del(key: &[u8]) -> Self {
        Mutation::Del { key: key.to_vec() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            Mutation::Set { key, .. } | Mutation::Del { key } => key,
        }
    }

    pub(crate) fn feed(&self, hasher: &mut Sha256) {
        match self {
            Mutation::Set { key, value } => {
                hasher.update([1u8]);
                hasher.update((key.len() as u32).to_be_bytes());
                hasher.update(key);
                hasher.update((value.len() as u32).to_be_bytes());
                hasher.update(value);
            }
            Mutation::Del { key } => {
                hasher.update([2u8]);
                hasher.update((key.len() as u32).to_be_bytes());
                hasher.update(key);
            }
        }
    }
}

/// Ordered mutation log. Order is significant: it is part of the hashed history.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Mutations {
    log: Vec<Mutation>,
}

impl Mutations {
    pub fn new() -> Self {
        Mutations::default()
    }

    pub fn set(&mut self, key: &[u8], value: &[u8]) {
        self.log.push(Mutation::set(key, value));
    }

    pub fn del(&mut self, key: &[u8]) {
        self.log.push(Mutation::del(key));
    }

    pub fn push(&mut self, mutation: Mutation) {
        self.log.push(mutation);
    }

    /// Latest mutation touching `key`: `Some(Some(v))` for a set, `Some(None)`
    /// for a delete, `None` if the log never touched it.
    pub fn latest(&self, key: &[u8]) -> Option<Option<&[u8]>> {
        self.log.iter().rev().find(|m| m.key() == key).map(|m| match m {
            Mutation::Set { value, .. } => Some(value.as_slice()),
            Mutation::Del { .. } => None,
        })
    }

    pub fn len(&self) -> usize {
        self.log.len()
    }

    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    pub fn truncate(&mut self, len: usize) {
        self.log.truncate(len);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Mutation> {
        self.log.iter()
    }

    pub fn as_slice(&self) -> &[Mutation] {
        &self.log
    }
}

impl From<Vec<Mutation>> for Mutations {
    fn from(log: Vec<Mutation>) -> Self {
        Mutations { log }
    }
}

impl Hashable for Mutations {
    fn hash(&self) -> HashValue {
        let mut hasher = Sha256::new();
        hasher.update((self.log.len() as u32).to_be_bytes());
        for mutation in &self.log {
            mutation.feed(&mut hasher);
        }
        finish(hasher)
    }
}
