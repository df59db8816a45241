/*
    Fail-fast access to a virtual state under a baseline.

    Every accessor validates the baseline before and after delegating and
    panics on invalidation or on any state error. Use it only where the caller
    has already established that neither can happen, e.g. after all writers of
    the chain have stopped. Everything else goes through the `Result` API of
    `VirtualState`.
*/

use crate::common::hashing::HashValue;
use crate::kv::KvRead;

use super::sync::StateBaseline;
use super::{Block, StateUpdate, VirtualState};

pub struct MustOptimisticVirtualState {
    state: VirtualState,
    baseline: StateBaseline,
}

impl MustOptimisticVirtualState {
    pub fn wrap(state: VirtualState, baseline: StateBaseline) -> Self {
        MustOptimisticVirtualState { state, baseline }
    }

    fn guarded<T>(&self, f: impl FnOnce(&VirtualState) -> T) -> T {
        self.baseline.must_validate();
        let out = f(&self.state);
        self.baseline.must_validate();
        out
    }

    fn guarded_mut<T>(&mut self, f: impl FnOnce(&mut VirtualState) -> T) -> T {
        self.baseline.must_validate();
        let out = f(&mut self.state);
        self.baseline.must_validate();
        out
    }

    pub fn block_index(&self) -> u32 {
        self.guarded(|s| s.block_index())
            .unwrap_or_else(|e| panic!("block_index: {}", e))
    }

    pub fn timestamp(&self) -> i64 {
        self.guarded(|s| s.timestamp())
            .unwrap_or_else(|e| panic!("timestamp: {}", e))
    }

    pub fn previous_state_hash(&self) -> HashValue {
        self.guarded(|s| s.previous_state_hash())
            .unwrap_or_else(|e| panic!("previous_state_hash: {}", e))
    }

    pub fn state_commitment(&self) -> HashValue {
        self.guarded(|s| s.state_commitment())
    }

    pub fn get(&self, key: &[u8]) -> Option<Vec<u8>> {
        self.guarded(|s| s.get(key))
            .unwrap_or_else(|e| panic!("get: {}", e))
    }

    pub fn apply_state_updates(&mut self, updates: &[StateUpdate]) {
        self.guarded_mut(|s| s.apply_state_updates(updates))
    }

    pub fn apply_block(&mut self, block: &Block) {
        self.guarded_mut(|s| s.apply_block(block))
            .unwrap_or_else(|e| panic!("apply_block: {}", e))
    }

    pub fn extract_block(&mut self) -> Block {
        self.guarded_mut(|s| s.extract_block())
            .unwrap_or_else(|e| panic!("extract_block: {}", e))
    }

    pub fn copy(&self) -> VirtualState {
        self.guarded(|s| s.copy())
    }

    pub fn dump(&self) -> String {
        self.guarded(|s| s.dump())
    }

    pub fn into_inner(self) -> VirtualState {
        self.state
    }
}
