use std::sync::Arc;

use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;
use tracing::{debug, trace};

use crate::common::hashing::{hash_data, HashValue};
use crate::common::{AgentId, ChainId, Hname, RequestId};
use crate::kv::{KvRead, KvWrite, Mutations};
use crate::state::{StateError, StateUpdate, VirtualState};

use super::contract::{Contract, ContractRegistry};
use super::essence::{Output, RequestReceipt, TxBuilder};
use super::request::{Params, Request};
use super::task::RoundInputs;
use super::VmError;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 16;

const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Lengths of everything a frame may append to, taken on frame entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct Checkpoint {
    mutations: usize,
    outputs: usize,
    events: usize,
}

#[derive(Clone, Debug)]
pub struct CallFrame {
    pub is_request_context: bool,
    pub caller: AgentId,
    pub contract: Hname,
    pub params: Params,
    pub transfer: u64,
    checkpoint: Checkpoint,
}

/// Scratch space for executing one round's requests against a private state
/// snapshot.
///
/// Contract writes of the current request are buffered and folded into the
/// snapshot as one state update when the request finishes. A frame rollback
/// truncates the buffers back to the frame's checkpoint, so it is idempotent
/// and safe after partial nested execution.
pub struct ExecutionContext<'a> {
    chain_id: ChainId,
    timestamp: i64,
    fee_target: AgentId,
    registry: &'a ContractRegistry,
    state: VirtualState,
    update: Mutations,
    tx_builder: TxBuilder,
    entropy: HashValue,
    rng_draws: u64,
    request_id: Option<RequestId>,
    call_stack: Vec<CallFrame>,
    max_depth: usize,
    events: Vec<String>,
}

pub struct ExecutionResult {
    pub state: VirtualState,
    pub outputs: Vec<Output>,
    pub events: Vec<String>,
}

impl<'a> ExecutionContext<'a> {
    pub fn new(
        inputs: &RoundInputs,
        state: VirtualState,
        registry: &'a ContractRegistry,
        max_depth: usize,
    ) -> Self {
        ExecutionContext {
            chain_id: *inputs.chain_id(),
            timestamp: inputs.timestamp(),
            fee_target: *inputs.fee_target(),
            registry,
            state,
            update: Mutations::new(),
            tx_builder: TxBuilder::new(),
            entropy: *inputs.entropy(),
            rng_draws: 0,
            request_id: None,
            call_stack: Vec::new(),
            max_depth,
            events: Vec::new(),
        }
    }

    /// Writes the block header update. Returns the new block index and the
    /// commitment the block extends.
    pub fn open_block(&mut self) -> Result<(u32, HashValue), VmError> {
        let index = self.state.next_block_index()?;
        let prev = self.state.state_commitment();
        self.state
            .apply_state_updates(&[StateUpdate::block_header(index, self.timestamp, Some(&prev))]);
        Ok((index, prev))
    }

    pub fn run_request(&mut self, request: &Request) -> RequestReceipt {
        let id = request.id();
        self.entropy = hash_data(&[self.entropy.as_ref(), id.0.as_ref()]);
        self.request_id = Some(id);
        self.update = Mutations::new();

        let result = self.call_frame(
            true,
            request.sender(),
            request.target(),
            request.entry_point(),
            request.params().clone(),
            request.transfer(),
        );

        // attached tokens accrue to the fee target, or go back on failure
        if request.transfer() > 0 {
            let to = if result.is_ok() {
                self.fee_target
            } else {
                request.sender()
            };
            self.tx_builder.push(Output::Transfer {
                to,
                amount: request.transfer(),
            });
        }
        let update = std::mem::take(&mut self.update);
        if !update.is_empty() {
            self.state
                .apply_state_updates(&[StateUpdate::from_mutations(update)]);
        }
        self.request_id = None;

        match result {
            Ok(_) => RequestReceipt {
                request: id,
                error: None,
            },
            Err(err) => {
                debug!(req = %id, "request failed: {}", err);
                RequestReceipt {
                    request: id,
                    error: Some(err.to_string()),
                }
            }
        }
    }

    fn call_frame(
        &mut self,
        is_request_context: bool,
        caller: AgentId,
        target: Hname,
        entry_point: Hname,
        params: Params,
        transfer: u64,
    ) -> Result<Params, VmError> {
        if self.call_stack.len() >= self.max_depth {
            return Err(VmError::CallStackOverflow(self.call_stack.len()));
        }
        let contract: Arc<dyn Contract> = self
            .registry
            .get(target)
            .cloned()
            .ok_or(VmError::ContractNotFound(target))?;

        trace!(contract = %target, entry = %entry_point, depth = self.call_stack.len(), "call");
        self.call_stack.push(CallFrame {
            is_request_context,
            caller,
            contract: target,
            params,
            transfer,
            checkpoint: Checkpoint {
                mutations: self.update.len(),
                outputs: self.tx_builder.len(),
                events: self.events.len(),
            },
        });
        let result = contract.call(self, entry_point);
        if result.is_err() {
            self.rollback();
        }
        self.call_stack.pop();
        result
    }

    /// Invokes another contract from the current one.
    pub fn call(
        &mut self,
        target: Hname,
        entry_point: Hname,
        params: Params,
        transfer: u64,
    ) -> Result<Params, VmError> {
        let caller = self.my_agent_id();
        self.call_frame(false, caller, target, entry_point, params, transfer)
    }

    /// Discards everything the current frame wrote, keeping the frame itself.
    pub fn rollback(&mut self) {
        if let Some(frame) = self.call_stack.last() {
            let cp = frame.checkpoint;
            self.update.truncate(cp.mutations);
            self.tx_builder.truncate(cp.outputs);
            self.events.truncate(cp.events);
        }
    }

    fn frame(&self) -> Option<&CallFrame> {
        self.call_stack.last()
    }

    pub fn call_depth(&self) -> usize {
        self.call_stack.len()
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn fee_target(&self) -> &AgentId {
        &self.fee_target
    }

    pub fn is_request_context(&self) -> bool {
        self.frame().map_or(false, |f| f.is_request_context)
    }

    pub fn caller(&self) -> Option<AgentId> {
        self.frame().map(|f| f.caller)
    }

    /// Contract of the current frame. Outside any frame this is the root
    /// hname `0`.
    pub fn my_contract(&self) -> Hname {
        self.frame().map_or(Hname(0), |f| f.contract)
    }

    pub fn my_agent_id(&self) -> AgentId {
        AgentId::for_contract(&self.chain_id, self.my_contract())
    }

    pub fn params(&self) -> Params {
        self.frame().map(|f| f.params.clone()).unwrap_or_default()
    }

    pub fn transfer(&self) -> u64 {
        self.frame().map_or(0, |f| f.transfer)
    }

    pub fn request_id(&self) -> Option<RequestId> {
        self.request_id
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    /// 32 bytes of deterministic, unpredictable data for the current request.
    pub fn entropy(&self) -> HashValue {
        self.entropy
    }

    /// Deterministic generator seeded from the request entropy. Each call
    /// yields a fresh stream.
    pub fn rng(&mut self) -> ChaCha20Rng {
        self.rng_draws += 1;
        let seed = hash_data(&[self.entropy.as_ref(), &self.rng_draws.to_be_bytes()]);
        ChaCha20Rng::from_seed(seed.0)
    }

    /// State of the current contract, namespaced by its hname.
    pub fn state(&mut self) -> ContractState<'_> {
        ContractState {
            prefix: self.my_contract().to_bytes(),
            state: &self.state,
            update: &mut self.update,
        }
    }

    pub fn post_request(
        &mut self,
        target_chain: ChainId,
        target: Hname,
        entry_point: Hname,
        params: Params,
        transfer: u64,
        delay_secs: Option<u32>,
    ) {
        let output = Output::Request {
            sender: self.my_agent_id(),
            target_chain,
            target,
            entry_point,
            params,
            transfer,
            unlock_at: delay_secs
                .map(|d| self.timestamp.saturating_add(i64::from(d).saturating_mul(NANOS_PER_SEC))),
        };
        self.tx_builder.push(output);
    }

    pub fn post_request_to_self_with_delay(&mut self, entry_point: Hname, params: Params, delay_secs: u32) {
        let chain = self.chain_id;
        let me = self.my_contract();
        self.post_request(chain, me, entry_point, params, 0, Some(delay_secs));
    }

    pub fn transfer_to(&mut self, to: AgentId, amount: u64) {
        self.tx_builder.push(Output::Transfer { to, amount });
    }

    pub fn event(&mut self, msg: impl Into<String>) {
        let msg = msg.into();
        debug!(contract = %self.my_contract(), "vmmsg: {}", msg);
        self.events.push(msg);
    }

    pub fn snapshot(&self) -> &VirtualState {
        &self.state
    }

    pub fn finish(self) -> ExecutionResult {
        ExecutionResult {
            state: self.state,
            outputs: self.tx_builder.into_outputs(),
            events: self.events,
        }
    }
}

pub struct ContractState<'c> {
    prefix: [u8; 4],
    state: &'c VirtualState,
    update: &'c mut Mutations,
}

impl ContractState<'_> {
    fn full_key(&self, key: &[u8]) -> Vec<u8> {
        let mut full = Vec::with_capacity(4 + key.len());
        full.extend_from_slice(&self.prefix);
        full.extend_from_slice(key);
        full
    }
}

impl KvRead for ContractState<'_> {
    type Error = StateError;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StateError> {
        let full = self.full_key(key);
        match self.update.latest(&full) {
            Some(value) => Ok(value.map(|v| v.to_vec())),
            None => self.state.get(&full),
        }
    }
}

impl KvWrite for ContractState<'_> {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        let full = self.full_key(key);
        self.update.set(&full, value);
    }

    fn del(&mut self, key: &[u8]) {
        let full = self.full_key(key);
        self.update.del(&full);
    }
}

#[cfg(test)]
mod tests {
    use rand::RngCore;

    use super::*;
    use crate::common::hashing::HashValue;
    use crate::vm::testing::{counter_registry, inputs_with, sender, Counter};

    fn origin() -> VirtualState {
        VirtualState::new_origin(crate::kv::MemStore::new(), ChainId::from_name("ctx"))
            .unwrap()
            .0
    }

    fn request(entry: &str) -> Request {
        Request::new(sender(), Counter::hname_const(), Hname::from_name(entry))
    }

    #[test]
    fn test_request_writes_are_folded_per_request() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        ctx.open_block().unwrap();
        let r1 = ctx.run_request(&request("inc"));
        let r2 = ctx.run_request(&request("inc").with_nonce(1));
        assert!(r1.error.is_none() && r2.error.is_none());

        let mut out = ctx.finish().state;
        let block = out.extract_block().unwrap();
        // header + one update per request
        assert_eq!(block.updates().len(), 3);
        let key = [Counter::hname_const().to_bytes().as_slice(), b"n"].concat();
        assert_eq!(out.get_u64(&key).unwrap(), Some(2));
    }

    #[test]
    fn test_failed_request_rolls_back_and_refunds() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        ctx.open_block().unwrap();
        let receipt = ctx.run_request(&request("fail").with_transfer(10));
        assert!(receipt.error.is_some());

        let result = ctx.finish();
        assert_eq!(
            result.outputs,
            vec![Output::Transfer {
                to: sender(),
                amount: 10
            }]
        );
        let mut state = result.state;
        assert_eq!(state.extract_block().unwrap().updates().len(), 1);
    }

    #[test]
    fn test_successful_request_pays_fee_target() {
        let registry = counter_registry();
        let fees = AgentId(hash_data(&[b"fee target"]));
        let inputs = RoundInputs::new(
            0,
            ChainId::from_name("ctx"),
            vec![],
            1_000,
            HashValue::default(),
            fees,
            crate::state::StateSync::new().baseline(),
        );
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        ctx.open_block().unwrap();
        assert!(ctx.run_request(&request("inc").with_transfer(7)).error.is_none());
        assert!(ctx.run_request(&request("fail").with_transfer(3)).error.is_some());
        // nothing attached, nothing to move
        assert!(ctx.run_request(&request("inc").with_nonce(1)).error.is_none());

        assert_eq!(
            ctx.finish().outputs,
            vec![
                Output::Transfer { to: fees, amount: 7 },
                Output::Transfer {
                    to: sender(),
                    amount: 3
                },
            ]
        );
    }

    #[test]
    fn test_nested_failure_rolls_back_only_inner_frame() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        ctx.open_block().unwrap();
        let receipt = ctx.run_request(&request("inc_then_fail_inner"));
        assert!(receipt.error.is_none());

        let state = ctx.finish().state;
        let prefix = Counter::hname_const().to_bytes();
        assert_eq!(state.get_u64(&[prefix.as_slice(), b"n"].concat()).unwrap(), Some(1));
        assert_eq!(state.get(&[prefix.as_slice(), b"poison"].concat()).unwrap(), None);
    }

    #[test]
    fn test_rollback_is_idempotent() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        ctx.open_block().unwrap();
        assert!(ctx.run_request(&request("rollback_twice")).error.is_none());

        let state = ctx.finish().state;
        let prefix = Counter::hname_const().to_bytes();
        assert_eq!(state.get(&[prefix.as_slice(), b"discarded"].concat()).unwrap(), None);
        assert_eq!(state.get(&[prefix.as_slice(), b"kept"].concat()).unwrap(), Some(b"1".to_vec()));
    }

    #[test]
    fn test_recursion_is_bounded() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, 4);
        ctx.open_block().unwrap();
        let receipt = ctx.run_request(&request("recurse"));
        assert_eq!(receipt.error, Some(VmError::CallStackOverflow(4).to_string()));
    }

    #[test]
    fn test_unknown_contract() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        let req = Request::new(sender(), Hname::from_name("nope"), Hname::from_name("x"));
        let receipt = ctx.run_request(&req);
        assert_eq!(
            receipt.error,
            Some(VmError::ContractNotFound(Hname::from_name("nope")).to_string())
        );
    }

    #[test]
    fn test_rng_is_derived_from_entropy() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut a = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        let mut b = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        assert_eq!(a.rng().next_u64(), b.rng().next_u64());
        let first = a.rng().next_u64();
        assert_ne!(first, a.rng().next_u64());
        assert_ne!(a.entropy(), HashValue([0u8; 32]));
    }

    #[test]
    fn test_post_request_with_delay() {
        let registry = counter_registry();
        let inputs = inputs_with(vec![]);
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        ctx.open_block().unwrap();
        assert!(ctx.run_request(&request("post_later")).error.is_none());
        let outputs = ctx.finish().outputs;
        match &outputs[..] {
            [Output::Request { unlock_at, target, .. }] => {
                assert_eq!(*target, Counter::hname_const());
                assert_eq!(*unlock_at, Some(inputs.timestamp() + 5 * NANOS_PER_SEC));
            }
            other => panic!("unexpected outputs {:?}", other),
        }
    }

    #[test]
    fn test_delay_near_end_of_time_saturates() {
        let registry = counter_registry();
        let inputs = RoundInputs::new(
            0,
            ChainId::from_name("ctx"),
            vec![],
            i64::MAX - 1,
            HashValue::default(),
            sender(),
            crate::state::StateSync::new().baseline(),
        );
        let mut ctx = ExecutionContext::new(&inputs, origin(), &registry, DEFAULT_MAX_CALL_DEPTH);
        ctx.open_block().unwrap();
        assert!(ctx.run_request(&request("post_later")).error.is_none());
        match &ctx.finish().outputs[..] {
            [Output::Request { unlock_at, .. }] => assert_eq!(*unlock_at, Some(i64::MAX)),
            other => panic!("unexpected outputs {:?}", other),
        }
    }
}
