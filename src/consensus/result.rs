use std::time::Duration;

use thiserror::Error;

use crate::common::crypto::SignerError;
use crate::common::hashing::HashValue;
use crate::common::PeerIndex;
use crate::state::{Block, StateError};
use crate::vm::{SignedTransaction, VmError};

use super::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum RoundError {
    #[error("no quorum within {0:?}")]
    Timeout(Duration),
    #[error("execution failed: {0}")]
    Execution(#[from] VmError),
    #[error(transparent)]
    Signer(#[from] SignerError),
    #[error(transparent)]
    State(#[from] StateError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("committee: {0}")]
    Committee(String),
    #[error("round {0} is still running")]
    Busy(u64),
    #[error("round cancelled")]
    Cancelled,
}

/// A finalized round: the signed result transaction and the block that was
/// applied for it.
#[derive(Clone, Debug)]
pub struct RoundResult {
    pub session_id: u64,
    pub leader: PeerIndex,
    pub signed_tx: SignedTransaction,
    pub block: Block,
    pub state_commitment: HashValue,
    /// Contract events of the round's successful requests.
    pub events: Vec<String>,
}

pub type RoundOutcome = Result<RoundResult, RoundError>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RoundStage {
    Idle,
    Executing,
    AwaitingShares,
    AwaitingLeaderResult,
    Finalized,
    Abandoned,
}

impl RoundStage {
    pub fn is_terminal(self) -> bool {
        matches!(self, RoundStage::Finalized | RoundStage::Abandoned)
    }
}
