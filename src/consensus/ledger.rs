use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use thiserror::Error;
use tracing::debug;

use crate::vm::SignedTransaction;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("ledger rejected transaction: {0}")]
pub struct LedgerError(pub String);

/// Receives the signed result transaction of every round this node led.
pub trait LedgerSubmitter: Send + Sync {
    fn submit(&self, tx: &SignedTransaction) -> Result<(), LedgerError>;
}

/// Keeps submitted transactions in memory.
#[derive(Default)]
pub struct MemLedger {
    submitted: Mutex<Vec<SignedTransaction>>,
    rejecting: AtomicBool,
}

impl MemLedger {
    pub fn new() -> Self {
        MemLedger::default()
    }

    /// While set, every submission fails.
    pub fn set_rejecting(&self, rejecting: bool) {
        self.rejecting.store(rejecting, Ordering::SeqCst);
    }

    pub fn submitted(&self) -> Vec<SignedTransaction> {
        self.submitted.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.submitted.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.submitted.lock().is_empty()
    }
}

impl LedgerSubmitter for MemLedger {
    fn submit(&self, tx: &SignedTransaction) -> Result<(), LedgerError> {
        if self.rejecting.load(Ordering::SeqCst) {
            return Err(LedgerError("submission disabled".into()));
        }
        debug!(block = tx.essence.block_index, "ledger: accepted transaction");
        self.submitted.lock().push(tx.clone());
        Ok(())
    }
}
