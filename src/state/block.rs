use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha256};

use crate::common::hashing::{finish, HashValue, Hashable};
use crate::kv::{decode_i64, decode_u64, encode_i64, encode_u64, Mutation, Mutations};

use super::layout::{KEY_BLOCK_INDEX, KEY_PREV_STATE_HASH, KEY_TIMESTAMP};
use super::StateError;

/// One ordered batch of mutations. The unit folded into the state commitment.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct StateUpdate {
    mutations: Mutations,
}

impl StateUpdate {
    pub fn from_mutations(mutations: Mutations) -> Self {
        StateUpdate { mutations }
    }

    /// The first update of every block: records index, timestamp and, when
    /// known, the commitment of the state the block extends.
    pub fn block_header(index: u32, timestamp: i64, prev_state_hash: Option<&HashValue>) -> Self {
        let mut mutations = Mutations::new();
        mutations.set(KEY_BLOCK_INDEX, &encode_u64(index as u64));
        mutations.set(KEY_TIMESTAMP, &encode_i64(timestamp));
        if let Some(prev) = prev_state_hash {
            mutations.set(KEY_PREV_STATE_HASH, prev.as_ref());
        }
        StateUpdate { mutations }
    }

    pub fn mutations(&self) -> &Mutations {
        &self.mutations
    }

    pub fn mutations_mut(&mut self) -> &mut Mutations {
        &mut self.mutations
    }

    pub fn is_empty(&self) -> bool {
        self.mutations.is_empty()
    }
}

impl Hashable for StateUpdate {
    fn hash(&self) -> HashValue {
        self.mutations.hash()
    }
}

/// Immutable, index-stamped sequence of state updates.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Block {
    index: u32,
    timestamp: i64,
    updates: Vec<StateUpdate>,
}

impl Block {
    /// Builds a block whose first update is the header for `index` /
    /// `timestamp`, followed by `mutations` in the same update.
    pub fn new(index: u32, timestamp: i64, mutations: Mutations) -> Self {
        let mut update = StateUpdate::block_header(index, timestamp, None);
        for m in mutations.iter() {
            update.mutations_mut().push(m.clone());
        }
        Block {
            index,
            timestamp,
            updates: vec![update],
        }
    }

    pub fn from_updates(index: u32, timestamp: i64, updates: Vec<StateUpdate>) -> Self {
        Block {
            index,
            timestamp,
            updates,
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn updates(&self) -> &[StateUpdate] {
        &self.updates
    }

    pub fn into_updates(self) -> Vec<StateUpdate> {
        self.updates
    }

    fn last_reserved(&self, key: &[u8]) -> Option<&Mutation> {
        self.updates
            .iter()
            .rev()
            .flat_map(|u| u.mutations().as_slice().iter().rev())
            .find(|m| m.key() == key)
    }

    /// Block index as written by the block's own mutations.
    pub fn declared_index(&self) -> Option<u32> {
        match self.last_reserved(KEY_BLOCK_INDEX)? {
            Mutation::Set { value, .. } => decode_u64(value).ok().and_then(|i| u32::try_from(i).ok()),
            Mutation::Del { .. } => None,
        }
    }

    pub fn declared_timestamp(&self) -> Option<i64> {
        match self.last_reserved(KEY_TIMESTAMP)? {
            Mutation::Set { value, .. } => decode_i64(value).ok(),
            Mutation::Del { .. } => None,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        bincode::serialize(self).map_err(|e| StateError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        bincode::deserialize(bytes).map_err(|e| StateError::Encode(e.to_string()))
    }
}

impl Hashable for Block {
    fn hash(&self) -> HashValue {
        let mut hasher = Sha256::new();
        hasher.update(self.index.to_be_bytes());
        hasher.update(self.timestamp.to_be_bytes());
        for update in &self.updates {
            hasher.update(update.hash());
        }
        finish(hasher)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_block_declares_its_header() {
        let mut muts = Mutations::new();
        muts.set(b"aaaa", b"1");
        let block = Block::new(3, 1_000, muts);

        assert_eq!(block.declared_index(), Some(3));
        assert_eq!(block.declared_timestamp(), Some(1_000));
        assert_eq!(block.updates()[0].mutations().len(), 3);
    }

    #[test]
    fn test_block_bytes_round_trip() {
        let mut muts = Mutations::new();
        muts.set(b"aaaa", b"1");
        muts.del(b"bbbb");
        let block = Block::new(1, 5, muts);
        let decoded = Block::from_bytes(&block.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, block);
        assert_eq!(decoded.hash(), block.hash());
    }
}
