use std::sync::Arc;

use tracing::{debug, warn};

use crate::common::hashing::{fold, HashValue, Hashable, NIL_HASH};
use crate::common::ChainId;
use crate::kv::{decode_hash, sub_realm, BufferedKvStore, KvRead, KvStore, MemStore, Mutation, Mutations};

use super::block::{Block, StateUpdate};
use super::layout::{
    block_key, load_block_index, load_prev_state_hash, load_timestamp, make_key, state_hash_key,
    OBJECT_TYPE_STATE_VARIABLE,
};
use super::sync::StateSync;
use super::StateError;

/// Versioned, hash-chained key/value state of one chain.
///
/// The commitment is folded once per applied state update, in application
/// order: `c' = H(c || H(update))`. It therefore fingerprints the whole
/// mutation history, not only the final values.
///
/// A `VirtualState` has exactly one writer. Copies share the backing store
/// but carry their own overlay and update log.
#[derive(Clone)]
pub struct VirtualState {
    chain_id: ChainId,
    db: Arc<dyn KvStore>,
    kvs: BufferedKvStore,
    update_log: Vec<StateUpdate>,
    committed_hash: HashValue,
    uncommitted_hash: HashValue,
    empty: bool,
    desynced: bool,
}

impl VirtualState {
    pub fn new(db: Arc<dyn KvStore>, chain_id: ChainId) -> Self {
        let realm = sub_realm(db.clone(), &[OBJECT_TYPE_STATE_VARIABLE]);
        VirtualState {
            chain_id,
            db,
            kvs: BufferedKvStore::new(realm),
            update_log: Vec::new(),
            committed_hash: NIL_HASH,
            uncommitted_hash: NIL_HASH,
            empty: true,
            desynced: false,
        }
    }

    /// Empty state with the origin block (#0, timestamp 0) applied.
    pub fn new_origin(db: Arc<dyn KvStore>, chain_id: ChainId) -> Result<(Self, Block), StateError> {
        let mut state = VirtualState::new(db, chain_id);
        let origin = Block::new(0, 0, Mutations::new());
        state.apply_block(&origin)?;
        Ok((state, origin))
    }

    /// Restores the last committed state, or `None` if nothing was committed.
    pub fn load(db: Arc<dyn KvStore>, chain_id: ChainId) -> Result<Option<Self>, StateError> {
        let hash = match db.get(&state_hash_key())? {
            Some(bytes) => decode_hash(&bytes)?,
            None => return Ok(None),
        };
        let mut state = VirtualState::new(db, chain_id);
        state.committed_hash = hash;
        state.empty = false;
        // a committed state always carries its header
        state.block_index()?;
        Ok(Some(state))
    }

    /// Independent snapshot: same backing store, own overlay and log.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn db(&self) -> &Arc<dyn KvStore> {
        &self.db
    }

    pub fn is_empty(&self) -> bool {
        self.empty
    }

    pub fn is_desynced(&self) -> bool {
        self.desynced
    }

    pub fn block_index(&self) -> Result<u32, StateError> {
        load_block_index(self)
    }

    pub fn timestamp(&self) -> Result<i64, StateError> {
        load_timestamp(self)
    }

    pub fn previous_state_hash(&self) -> Result<HashValue, StateError> {
        load_prev_state_hash(self)
    }

    pub fn state_commitment(&self) -> HashValue {
        self.committed_hash
    }

    /// Fold of the updates applied since the last extracted block.
    pub fn uncommitted_hash(&self) -> HashValue {
        self.uncommitted_hash
    }

    /// Index the next block must carry.
    pub fn next_block_index(&self) -> Result<u32, StateError> {
        if self.empty {
            Ok(0)
        } else {
            Ok(self.block_index()? + 1)
        }
    }

    /// Checks the block against this state and applies it.
    ///
    /// A consistency failure poisons the instance: every later block is
    /// refused, since the state either received a malicious block or fell out
    /// of sync with the committee.
    pub fn apply_block(&mut self, block: &Block) -> Result<(), StateError> {
        if self.desynced {
            return Err(StateError::Consistency(format!(
                "state is desynchronized, refusing block #{}",
                block.index()
            )));
        }
        if let Err(err) = self.check_block(block) {
            warn!(block = block.index(), chain = %self.chain_id, "rejecting block: {}", err);
            self.desynced = true;
            return Err(err);
        }
        for update in block.updates() {
            self.fold_update(update);
        }
        self.empty = false;
        debug!(block = block.index(), commitment = %self.committed_hash.short(), "applied block");
        Ok(())
    }

    fn check_block(&self, block: &Block) -> Result<(), StateError> {
        if self.empty && block.index() != 0 {
            return Err(StateError::Consistency(format!(
                "block #{} can't be applied to the empty state",
                block.index()
            )));
        }
        if !self.empty {
            let current = self.block_index()?;
            if current + 1 != block.index() {
                return Err(StateError::Consistency(format!(
                    "block #{} can't be applied to the state with index #{}",
                    block.index(),
                    current
                )));
            }
            if self.timestamp()? > block.timestamp() {
                return Err(StateError::Consistency("inconsistent timestamps".into()));
            }
        }
        if block.declared_index() != Some(block.index()) {
            return Err(StateError::Consistency(format!(
                "block #{} declares index {:?} in its mutations",
                block.index(),
                block.declared_index()
            )));
        }
        if block.declared_timestamp() != Some(block.timestamp()) {
            return Err(StateError::Consistency(format!(
                "block #{} declares a different timestamp in its mutations",
                block.index()
            )));
        }
        Ok(())
    }

    /// Applies raw updates without block validation, e.g. while a round is
    /// still executing. Each update is recorded for the next extracted block.
    pub fn apply_state_updates(&mut self, updates: &[StateUpdate]) {
        for update in updates {
            self.fold_update(update);
            self.uncommitted_hash = fold(&self.uncommitted_hash, &update.hash());
            self.update_log.push(update.clone());
        }
    }

    fn fold_update(&mut self, update: &StateUpdate) {
        self.kvs.apply(update.mutations());
        self.committed_hash = fold(&self.committed_hash, &update.hash());
    }

    /// Freezes the update log into a block and clears it.
    pub fn extract_block(&mut self) -> Result<Block, StateError> {
        let index = self.block_index()?;
        let timestamp = self.timestamp()?;
        let updates = std::mem::take(&mut self.update_log);
        let block = Block::from_updates(index, timestamp, updates);
        if block.declared_index() != Some(index) {
            self.update_log = block.into_updates();
            return Err(StateError::Consistency(
                "internal inconsistency: index of the state is not equal to the index of the extracted block"
                    .into(),
            ));
        }
        self.uncommitted_hash = NIL_HASH;
        Ok(block)
    }

    /// Writes the overlay, the commitment and `blocks` to the backing store
    /// in one batch, inside a baseline write window.
    pub fn commit(&mut self, sync: &StateSync, blocks: &[Block]) -> Result<(), StateError> {
        let mut batch: Vec<Mutation> = self
            .kvs
            .pending_batch()
            .into_iter()
            .map(|m| match m {
                Mutation::Set { key, value } => Mutation::Set {
                    key: make_key(OBJECT_TYPE_STATE_VARIABLE, &key),
                    value,
                },
                Mutation::Del { key } => Mutation::Del {
                    key: make_key(OBJECT_TYPE_STATE_VARIABLE, &key),
                },
            })
            .collect();
        batch.push(Mutation::set(&state_hash_key(), self.committed_hash.as_ref()));
        for block in blocks {
            batch.push(Mutation::Set {
                key: block_key(block.index()),
                value: block.to_bytes()?,
            });
        }
        {
            let _window = sync.begin_write();
            self.db.write_batch(&batch)?;
        }
        self.kvs.clear();
        debug!(chain = %self.chain_id, entries = batch.len(), "committed state");
        Ok(())
    }

    pub fn dump(&self) -> String {
        format!(
            "#{:?}, ts: {:?}, committed hash: {}, uncommitted hash: {}\n{}",
            self.block_index().ok(),
            self.timestamp().ok(),
            self.committed_hash,
            self.uncommitted_hash,
            self.kvs.dump()
        )
    }
}

impl KvRead for VirtualState {
    type Error = StateError;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        Ok(self.kvs.get(key)?)
    }
}

pub fn load_block(db: &dyn KvStore, index: u32) -> Result<Option<Block>, StateError> {
    match db.get(&block_key(index))? {
        Some(bytes) => Ok(Some(Block::from_bytes(&bytes)?)),
        None => Ok(None),
    }
}

/// Commitment of the origin state; independent of chain id and store.
pub fn origin_state_commitment() -> Result<HashValue, StateError> {
    let db: Arc<dyn KvStore> = MemStore::new();
    let (state, _) = VirtualState::new_origin(db, ChainId::default())?;
    Ok(state.state_commitment())
}
