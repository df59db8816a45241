// Contracts and fixtures shared by the vm and consensus tests.

use std::sync::Arc;

use rand::RngCore;

use crate::common::hashing::hash_data;
use crate::common::{AgentId, ChainId, Hname};
use crate::kv::{KvRead, KvWrite};
use crate::state::{StateBaseline, StateSync};

use super::context::ExecutionContext;
use super::contract::{Contract, ContractRegistry};
use super::request::{Params, Request};
use super::task::RoundInputs;
use super::VmError;

pub struct Counter;

impl Counter {
    pub fn hname_const() -> Hname {
        Hname::from_name("counter")
    }
}

impl Contract for Counter {
    fn name(&self) -> &str {
        "counter"
    }

    fn call(&self, ctx: &mut ExecutionContext<'_>, entry_point: Hname) -> Result<Params, VmError> {
        let by = ctx.params().get_u64(b"by")?.unwrap_or(1);
        match entry_point {
            e if e == Hname::from_name("inc") => {
                let mut state = ctx.state();
                let n = state.get_u64(b"n")?.unwrap_or(0) + by;
                state.set_u64(b"n", n);
                ctx.event(format!("n = {}", n));
                Ok(Params::new().with_u64("n", n))
            }
            e if e == Hname::from_name("fail") => {
                ctx.state().set(b"poison", b"1");
                ctx.event("about to fail");
                Err(VmError::contract("failing on purpose"))
            }
            e if e == Hname::from_name("inc_then_fail_inner") => {
                let me = ctx.my_contract();
                ctx.call(me, Hname::from_name("inc"), Params::new(), 0)?;
                let inner = ctx.call(me, Hname::from_name("fail"), Params::new(), 0);
                assert!(inner.is_err());
                Ok(Params::new())
            }
            e if e == Hname::from_name("rollback_twice") => {
                ctx.state().set(b"discarded", b"1");
                ctx.rollback();
                ctx.rollback();
                ctx.state().set(b"kept", b"1");
                Ok(Params::new())
            }
            e if e == Hname::from_name("recurse") => {
                let me = ctx.my_contract();
                ctx.call(me, entry_point, Params::new(), 0)
            }
            e if e == Hname::from_name("random") => {
                let draw = ctx.rng().next_u64();
                ctx.state().set_u64(b"draw", draw);
                Ok(Params::new().with_u64("draw", draw))
            }
            e if e == Hname::from_name("post_later") => {
                ctx.post_request_to_self_with_delay(Hname::from_name("inc"), Params::new(), 5);
                Ok(Params::new())
            }
            other => Err(VmError::EntryPointNotFound {
                contract: Counter::hname_const(),
                entry_point: other,
            }),
        }
    }
}

/// Writes a value that only this instance knows. Registering different
/// salts on different nodes breaks determinism on purpose.
pub struct Salted(pub u64);

impl Contract for Salted {
    fn name(&self) -> &str {
        "salted"
    }

    fn call(&self, ctx: &mut ExecutionContext<'_>, _entry_point: Hname) -> Result<Params, VmError> {
        ctx.state().set_u64(b"salt", self.0);
        Ok(Params::new())
    }
}

pub fn counter_registry() -> ContractRegistry {
    ContractRegistry::new().with(Arc::new(Counter))
}

pub fn sender() -> AgentId {
    AgentId(hash_data(&[b"test sender"]))
}

pub fn chain() -> ChainId {
    ChainId::from_name("test chain")
}

pub fn inc(nonce: u64) -> Request {
    Request::new(sender(), Counter::hname_const(), Hname::from_name("inc")).with_nonce(nonce)
}

pub fn inputs_for(session_id: u64, requests: Vec<Request>, baseline: StateBaseline) -> RoundInputs {
    RoundInputs::new(
        session_id,
        chain(),
        requests,
        1_000_000_000 * (session_id as i64 + 1),
        hash_data(&[b"entropy", &session_id.to_be_bytes()]),
        sender(),
        baseline,
    )
}

pub fn inputs_with(requests: Vec<Request>) -> RoundInputs {
    inputs_for(0, requests, StateSync::new().baseline())
}
