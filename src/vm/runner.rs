use std::sync::Arc;

use tracing::{debug, info};

use crate::common::hashing::HashValue;
use crate::common::PeerIndex;
use crate::state::{Block, VirtualState};

use super::context::{ExecutionContext, DEFAULT_MAX_CALL_DEPTH};
use super::contract::ContractRegistry;
use super::essence::{essence_hash, RequestReceipt, TransactionEssence};
use super::task::RoundInputs;
use super::VmError;

/// Everything one speculative execution produced.
#[derive(Clone)]
pub struct VmOutput {
    pub essence: TransactionEssence,
    pub essence_bytes: Vec<u8>,
    pub essence_hash: HashValue,
    pub block: Block,
    pub state: VirtualState,
    pub leader_index: PeerIndex,
    pub events: Vec<String>,
}

impl VmOutput {
    pub fn state_commitment(&self) -> HashValue {
        self.state.state_commitment()
    }
}

#[derive(Clone)]
pub struct Runner {
    registry: Arc<ContractRegistry>,
    max_call_depth: usize,
}

impl Runner {
    pub fn new(registry: Arc<ContractRegistry>) -> Self {
        Runner {
            registry,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
        }
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn registry(&self) -> &ContractRegistry {
        &self.registry
    }

    /// Executes the round's requests against `state`, a private copy of the
    /// chain state, and produces the essence every member signs.
    ///
    /// Fails with `StateError::Invalidated` if the state the copy was taken
    /// from got committed meanwhile, so the result would be stale.
    pub fn run(
        &self,
        inputs: &RoundInputs,
        state: VirtualState,
        leader_index: PeerIndex,
    ) -> Result<VmOutput, VmError> {
        inputs.baseline().validate()?;

        let mut ctx = ExecutionContext::new(inputs, state, &self.registry, self.max_call_depth);
        let (block_index, prev_state_commitment) = ctx.open_block()?;

        let mut receipts: Vec<RequestReceipt> = Vec::with_capacity(inputs.requests().len());
        for request in inputs.requests() {
            if !request.is_unlocked_at(inputs.timestamp()) {
                debug!(req = %request.id(), "request is time-locked, skipping");
                continue;
            }
            receipts.push(ctx.run_request(request));
        }

        let result = ctx.finish();
        let mut state = result.state;
        let block = state.extract_block()?;

        let essence = TransactionEssence {
            chain_id: *inputs.chain_id(),
            block_index,
            timestamp: inputs.timestamp(),
            prev_state_commitment,
            state_commitment: state.state_commitment(),
            fee_target: *inputs.fee_target(),
            receipts,
            outputs: result.outputs,
        };
        let essence_bytes = essence.to_bytes()?;
        let essence_hash = essence_hash(&essence_bytes);

        inputs.baseline().validate()?;

        info!(
            session = inputs.session_id(),
            block = block_index,
            requests = essence.receipts.len(),
            essence = %essence_hash.short(),
            "executed round"
        );
        Ok(VmOutput {
            essence,
            essence_bytes,
            essence_hash,
            block,
            state,
            leader_index,
            events: result.events,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kv::{KvRead, MemStore};
    use crate::state::{StateError, StateSync};
    use crate::vm::testing::{chain, counter_registry, inc, inputs_for, Counter};
    use crate::common::Hname;
    use crate::vm::Request;

    fn origin() -> VirtualState {
        VirtualState::new_origin(MemStore::new(), chain()).unwrap().0
    }

    fn runner() -> Runner {
        Runner::new(Arc::new(counter_registry()))
    }

    #[test]
    fn test_same_inputs_same_essence() {
        let sync = StateSync::new();
        let base = origin();
        let inputs = inputs_for(1, vec![inc(0), inc(1)], sync.baseline());
        let a = runner().run(&inputs, base.copy(), 0).unwrap();
        let b = runner().run(&inputs, base.copy(), 0).unwrap();
        assert_eq!(a.essence_bytes, b.essence_bytes);
        assert_eq!(a.essence_hash, b.essence_hash);
        assert_eq!(a.essence.block_index, 1);
        assert_eq!(a.essence.prev_state_commitment, base.state_commitment());
        assert_eq!(a.essence.state_commitment, a.state_commitment());
    }

    #[test]
    fn test_block_replays_to_same_commitment() {
        let sync = StateSync::new();
        let mut authoritative = origin();
        let inputs = inputs_for(1, vec![inc(0)], sync.baseline());
        let out = runner().run(&inputs, authoritative.copy(), 0).unwrap();

        authoritative.apply_block(&out.block).unwrap();
        assert_eq!(authoritative.state_commitment(), out.essence.state_commitment);
        let key = [Counter::hname_const().to_bytes().as_slice(), b"n"].concat();
        assert_eq!(authoritative.get_u64(&key).unwrap(), Some(1));
    }

    #[test]
    fn test_timelocked_requests_are_skipped() {
        let sync = StateSync::new();
        let inputs = inputs_for(1, vec![inc(0).with_timelock(i64::MAX), inc(1)], sync.baseline());
        let out = runner().run(&inputs, origin(), 0).unwrap();
        assert_eq!(out.essence.receipts.len(), 1);
        assert_eq!(out.essence.receipts[0].request, inc(1).id());
    }

    #[test]
    fn test_failed_request_gets_receipt() {
        let sync = StateSync::new();
        let bad = Request::new(inc(0).sender(), Hname::from_name("missing"), Hname::from_name("x"));
        let inputs = inputs_for(1, vec![bad, inc(1)], sync.baseline());
        let out = runner().run(&inputs, origin(), 0).unwrap();
        assert!(out.essence.receipts[0].error.is_some());
        assert!(out.essence.receipts[1].error.is_none());
    }

    #[test]
    fn test_stale_baseline_is_refused() {
        let sync = StateSync::new();
        let inputs = inputs_for(1, vec![inc(0)], sync.baseline());
        drop(sync.begin_write());
        match runner().run(&inputs, origin(), 0) {
            Err(VmError::State(StateError::Invalidated)) => {}
            other => panic!("unexpected result {:?}", other.map(|o| o.essence_hash)),
        }
    }
}
