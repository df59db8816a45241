use serde::{Deserialize, Serialize};

use crate::common::crypto::FullSignature;
use crate::common::hashing::{hash_data, HashValue};
use crate::common::{AgentId, ChainId, Hname, RequestId};

use super::request::Params;
use super::VmError;

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum Output {
    /// A request posted by a contract, to be picked up by `target_chain`.
    Request {
        sender: AgentId,
        target_chain: ChainId,
        target: Hname,
        entry_point: Hname,
        params: Params,
        transfer: u64,
        unlock_at: Option<i64>,
    },
    Transfer {
        to: AgentId,
        amount: u64,
    },
}

/// Outgoing transaction under construction. Append-only, so a frame
/// checkpoint is just a length.
#[derive(Clone, Debug, Default)]
pub struct TxBuilder {
    outputs: Vec<Output>,
}

impl TxBuilder {
    pub fn new() -> Self {
        TxBuilder::default()
    }

    pub fn push(&mut self, output: Output) {
        self.outputs.push(output);
    }

    pub(crate) fn len(&self) -> usize {
        self.outputs.len()
    }

    pub fn truncate(&mut self, len: usize) {
        self.outputs.truncate(len);
    }

    pub fn into_outputs(self) -> Vec<Output> {
        self.outputs
    }
}

#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct RequestReceipt {
    pub request: RequestId,
    pub error: Option<String>,
}

/// Canonical unsigned result transaction of one round.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct TransactionEssence {
    pub chain_id: ChainId,
    pub block_index: u32,
    pub timestamp: i64,
    pub prev_state_commitment: HashValue,
    pub state_commitment: HashValue,
    pub fee_target: AgentId,
    pub receipts: Vec<RequestReceipt>,
    pub outputs: Vec<Output>,
}

impl TransactionEssence {
    /// The bytes that are hashed and signed.
    pub fn to_bytes(&self) -> Result<Vec<u8>, VmError> {
        bincode::serialize(self).map_err(|e| VmError::Encode(e.to_string()))
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, VmError> {
        bincode::deserialize(bytes).map_err(|e| VmError::Encode(e.to_string()))
    }
}

pub fn essence_hash(essence_bytes: &[u8]) -> HashValue {
    hash_data(&[essence_bytes])
}

/// Essence with the recovered committee signature attached; what is handed
/// to the ledger.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct SignedTransaction {
    pub essence: TransactionEssence,
    pub signature: FullSignature,
}

impl SignedTransaction {
    pub fn attach(essence: TransactionEssence, signature: FullSignature) -> Self {
        SignedTransaction { essence, signature }
    }

    pub fn essence_bytes(&self) -> Result<Vec<u8>, VmError> {
        self.essence.to_bytes()
    }
}
