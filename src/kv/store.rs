/*
    Backing key/value store and realm partitioning.

    The backing store is shared by the authoritative state (the only writer)
    and any number of optimistic readers.
*/

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::mutations::Mutation;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("backing store failure: {0}")]
    Backend(String),
}

pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError>;

    /// Applies all mutations atomically, in order.
    fn write_batch(&self, batch: &[Mutation]) -> Result<(), StoreError>;
}

/// In-memory store.
#[derive(Default)]
pub struct MemStore {
    data: RwLock<BTreeMap<Vec<u8>, Vec<u8>>>,
}

impl MemStore {
    pub fn new() -> Arc<Self> {
        Arc::new(MemStore::default())
    }

    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }
}

impl KvStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        Ok(self.data.read().get(key).cloned())
    }

    fn write_batch(&self, batch: &[Mutation]) -> Result<(), StoreError> {
        let mut data = self.data.write();
        for mutation in batch {
            match mutation {
                Mutation::Set { key, value } => {
                    data.insert(key.clone(), value.clone());
                }
                Mutation::Del { key } => {
                    data.remove(key);
                }
            }
        }
        Ok(())
    }
}

/// A view of a store where every key is transparently prefixed.
pub struct Realm {
    inner: Arc<dyn KvStore>,
    prefix: Vec<u8>,
}

impl Realm {
    pub fn new(inner: Arc<dyn KvStore>, prefix: &[u8]) -> Self {
        Realm {
            inner,
            prefix: prefix.to_vec(),
        }
    }

    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(self.prefix.len() + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

pub fn sub_realm(store: Arc<dyn KvStore>, prefix: &[u8]) -> Arc<dyn KvStore> {
    Arc::new(Realm::new(store, prefix))
}

impl KvStore for Realm {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StoreError> {
        self.inner.get(&self.full_key(key))
    }

    fn write_batch(&self, batch: &[Mutation]) -> Result<(), StoreError> {
        let prefixed: Vec<Mutation> = batch
            .iter()
            .map(|m| match m {
                Mutation::Set { key, value } => Mutation::Set {
                    key: self.full_key(key),
                    value: value.clone(),
                },
                Mutation::Del { key } => Mutation::Del {
                    key: self.full_key(key),
                },
            })
            .collect();
        self.inner.write_batch(&prefixed)
    }
}
