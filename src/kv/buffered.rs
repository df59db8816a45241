use std::collections::BTreeMap;
use std::sync::Arc;

use super::mutations::{Key, Mutation, Mutations, Value};
use super::store::{KvStore, StoreError};

/// Uncommitted writes layered over a read-only view of the backing store.
///
/// Cloning shares the backing store reference and copies the overlay, so a
/// clone can be mutated without affecting the original.
#[derive(Clone)]
pub struct BufferedKvStore {
    backing: Arc<dyn KvStore>,
    overlay: BTreeMap<Key, Option<Value>>,
}

impl BufferedKvStore {
    pub fn new(backing: Arc<dyn KvStore>) -> Self {
        BufferedKvStore {
            backing,
            overlay: BTreeMap::new(),
        }
    }

    pub fn backing(&self) -> &Arc<dyn KvStore> {
        &self.backing
    }

    pub fn get(&self, key: &[u8]) -> Result<Option<Value>, StoreError> {
        match self.overlay.get(key) {
            Some(value) => Ok(value.clone()),
            None => self.backing.get(key),
        }
    }

    pub fn apply(&mut self, mutations: &Mutations) {
        for mutation in mutations.iter() {
            match mutation {
                Mutation::Set { key, value } => {
                    self.overlay.insert(key.clone(), Some(value.clone()));
                }
                Mutation::Del { key } => {
                    self.overlay.insert(key.clone(), None);
                }
            }
        }
    }

    pub fn is_dirty(&self) -> bool {
        !self.overlay.is_empty()
    }

    /// Net effect of the overlay as a write batch, in key order.
    pub fn pending_batch(&self) -> Vec<Mutation> {
        self.overlay
            .iter()
            .map(|(key, value)| match value {
                Some(value) => Mutation::Set {
                    key: key.clone(),
                    value: value.clone(),
                },
                None => Mutation::Del { key: key.clone() },
            })
            .collect()
    }

    pub fn clear(&mut self) {
        self.overlay.clear();
    }

    pub fn dump(&self) -> String {
        self.overlay
            .iter()
            .map(|(k, v)| match v {
                Some(v) => format!("{} = {}", hex::encode(k), hex::encode(v)),
                None => format!("{} = <deleted>", hex::encode(k)),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
