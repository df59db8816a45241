use std::sync::Arc;

use crate::common::hashing::HashValue;
use crate::kv::{decode_hash, sub_realm, KvRead, KvStore};

use super::layout::{
    load_block_index, load_prev_state_hash, load_timestamp, state_hash_key,
    OBJECT_TYPE_STATE_VARIABLE,
};
use super::sync::{StateBaseline, StateSync};
use super::StateError;

/// Lock-free reader validated against a baseline.
///
/// Every read checks the baseline before and after touching the store. If a
/// commit opened a write window at either point the read fails with
/// `StateError::Invalidated`, never with a possibly torn value.
pub struct OptimisticKvReader {
    reader: Arc<dyn KvStore>,
    baseline: StateBaseline,
}

impl OptimisticKvReader {
    pub fn new(reader: Arc<dyn KvStore>, baseline: StateBaseline) -> Self {
        OptimisticKvReader { reader, baseline }
    }

    pub fn is_state_valid(&self) -> bool {
        self.baseline.is_valid()
    }

    pub fn set_baseline(&mut self) {
        self.baseline.set_baseline();
    }

    pub fn baseline(&self) -> &StateBaseline {
        &self.baseline
    }
}

impl KvRead for OptimisticKvReader {
    type Error = StateError;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        self.baseline.validate()?;
        let value = self.reader.get(key)?;
        self.baseline.validate()?;
        Ok(value)
    }
}

/// Read-only view of the committed chain state in the database.
pub struct OptimisticStateReader {
    db: Arc<dyn KvStore>,
    chain_state: OptimisticKvReader,
}

impl OptimisticStateReader {
    pub fn new(db: Arc<dyn KvStore>, sync: &StateSync) -> Self {
        let realm = sub_realm(db.clone(), &[OBJECT_TYPE_STATE_VARIABLE]);
        OptimisticStateReader {
            db,
            chain_state: OptimisticKvReader::new(realm, sync.baseline()),
        }
    }

    pub fn block_index(&self) -> Result<u32, StateError> {
        load_block_index(&self.chain_state)
    }

    pub fn timestamp(&self) -> Result<i64, StateError> {
        load_timestamp(&self.chain_state)
    }

    pub fn previous_state_hash(&self) -> Result<HashValue, StateError> {
        load_prev_state_hash(&self.chain_state)
    }

    /// Commitment of the last committed state.
    pub fn hash(&self) -> Result<HashValue, StateError> {
        let baseline = self.chain_state.baseline();
        baseline.validate()?;
        let bytes = self
            .db
            .get(&state_hash_key())?
            .ok_or(StateError::NotFound("state hash"))?;
        let hash = decode_hash(&bytes)?;
        baseline.validate()?;
        Ok(hash)
    }

    pub fn kv_reader(&self) -> &OptimisticKvReader {
        &self.chain_state
    }

    pub fn set_baseline(&mut self) {
        self.chain_state.set_baseline();
    }
}
