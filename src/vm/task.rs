use std::fmt;

use crate::common::hashing::HashValue;
use crate::common::{AgentId, ChainId};
use crate::consensus::RoundOutcome;
use crate::state::StateBaseline;

use super::request::Request;

pub type CompletionCallback = Box<dyn FnOnce(&RoundOutcome) + Send>;

/// Inputs every committee member must agree on for a round.
#[derive(Clone)]
pub struct RoundInputs {
    session_id: u64,
    chain_id: ChainId,
    requests: Vec<Request>,
    timestamp: i64,
    entropy: HashValue,
    fee_target: AgentId,
    baseline: StateBaseline,
}

impl RoundInputs {
    pub fn new(
        session_id: u64,
        chain_id: ChainId,
        requests: Vec<Request>,
        timestamp: i64,
        entropy: HashValue,
        fee_target: AgentId,
        baseline: StateBaseline,
    ) -> Self {
        RoundInputs {
            session_id,
            chain_id,
            requests,
            timestamp,
            entropy,
            fee_target,
            baseline,
        }
    }

    pub fn session_id(&self) -> u64 {
        self.session_id
    }

    pub fn chain_id(&self) -> &ChainId {
        &self.chain_id
    }

    pub fn requests(&self) -> &[Request] {
        &self.requests
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp
    }

    pub fn entropy(&self) -> &HashValue {
        &self.entropy
    }

    pub fn fee_target(&self) -> &AgentId {
        &self.fee_target
    }

    pub fn baseline(&self) -> &StateBaseline {
        &self.baseline
    }
}

impl fmt::Debug for RoundInputs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RoundInputs")
            .field("session_id", &self.session_id)
            .field("chain_id", &self.chain_id)
            .field("requests", &self.requests.len())
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// One unit of consensus work. Consumed exactly once by the operator.
pub struct RoundTask {
    inputs: RoundInputs,
    on_finish: CompletionCallback,
}

impl RoundTask {
    pub fn new(inputs: RoundInputs, on_finish: CompletionCallback) -> Self {
        RoundTask { inputs, on_finish }
    }

    /// Task whose outcome is only observed through the operator's return value.
    pub fn detached(inputs: RoundInputs) -> Self {
        RoundTask::new(inputs, Box::new(|_| {}))
    }

    pub fn inputs(&self) -> &RoundInputs {
        &self.inputs
    }

    pub fn into_parts(self) -> (RoundInputs, CompletionCallback) {
        (self.inputs, self.on_finish)
    }
}
