use thiserror::Error;

use crate::common::Hname;
use crate::kv::DecodeError;
use crate::state::StateError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("contract {0} not found")]
    ContractNotFound(Hname),
    #[error("entry point {entry_point} not found in contract {contract}")]
    EntryPointNotFound { contract: Hname, entry_point: Hname },
    #[error("call stack overflow at depth {0}")]
    CallStackOverflow(usize),
    #[error("contract failed: {0}")]
    Contract(String),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("encoding failure: {0}")]
    Encode(String),
}

impl VmError {
    pub fn contract(msg: impl Into<String>) -> Self {
        VmError::Contract(msg.into())
    }
}

impl From<DecodeError> for VmError {
    fn from(err: DecodeError) -> Self {
        VmError::State(StateError::Decode(err))
    }
}
