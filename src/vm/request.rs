use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest as ShaDigest, Sha256};

use crate::common::hashing::finish;
use crate::common::{AgentId, Hname, RequestId};
use crate::kv::{DecodeError, KvRead, KvWrite};

/// Named call arguments or results. Ordered, so encodings are canonical.
#[derive(Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct Params(BTreeMap<String, Vec<u8>>);

impl Params {
    pub fn new() -> Self {
        Params::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Vec<u8>)> {
        self.0.iter()
    }

    pub fn with_u64(mut self, name: &str, value: u64) -> Self {
        self.set_u64(name.as_bytes(), value);
        self
    }

    pub fn with_string(mut self, name: &str, value: &str) -> Self {
        self.set_string(name.as_bytes(), value);
        self
    }

    fn feed(&self, hasher: &mut Sha256) {
        hasher.update((self.0.len() as u32).to_be_bytes());
        for (k, v) in &self.0 {
            hasher.update((k.len() as u32).to_be_bytes());
            hasher.update(k.as_bytes());
            hasher.update((v.len() as u32).to_be_bytes());
            hasher.update(v);
        }
    }
}

impl KvRead for Params {
    type Error = DecodeError;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, DecodeError> {
        let name = std::str::from_utf8(key).map_err(|e| DecodeError {
            what: "param name",
            reason: e.to_string(),
        })?;
        Ok(self.0.get(name).cloned())
    }
}

impl KvWrite for Params {
    fn set(&mut self, key: &[u8], value: &[u8]) {
        self.0
            .insert(String::from_utf8_lossy(key).into_owned(), value.to_vec());
    }

    fn del(&mut self, key: &[u8]) {
        self.0.remove(String::from_utf8_lossy(key).as_ref());
    }
}

/// Immutable unit of work addressed to a contract entry point.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Request {
    sender: AgentId,
    target: Hname,
    entry_point: Hname,
    params: Params,
    transfer: u64,
    timelock: Option<i64>,
    nonce: u64,
}

impl Request {
    pub fn new(sender: AgentId, target: Hname, entry_point: Hname) -> Self {
        Request {
            sender,
            target,
            entry_point,
            params: Params::new(),
            transfer: 0,
            timelock: None,
            nonce: 0,
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }

    pub fn with_transfer(mut self, amount: u64) -> Self {
        self.transfer = amount;
        self
    }

    /// Not executable before `unlock_at` (round timestamp, nanoseconds).
    pub fn with_timelock(mut self, unlock_at: i64) -> Self {
        self.timelock = Some(unlock_at);
        self
    }

    pub fn with_nonce(mut self, nonce: u64) -> Self {
        self.nonce = nonce;
        self
    }

    pub fn sender(&self) -> AgentId {
        self.sender
    }

    pub fn target(&self) -> Hname {
        self.target
    }

    pub fn entry_point(&self) -> Hname {
        self.entry_point
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn transfer(&self) -> u64 {
        self.transfer
    }

    pub fn timelock(&self) -> Option<i64> {
        self.timelock
    }

    pub fn is_unlocked_at(&self, timestamp: i64) -> bool {
        self.timelock.map_or(true, |t| t <= timestamp)
    }

    pub fn id(&self) -> RequestId {
        let mut hasher = Sha256::new();
        hasher.update(self.sender.0);
        hasher.update(self.target.to_bytes());
        hasher.update(self.entry_point.to_bytes());
        self.params.feed(&mut hasher);
        hasher.update(self.transfer.to_be_bytes());
        match self.timelock {
            Some(t) => {
                hasher.update([1u8]);
                hasher.update(t.to_be_bytes());
            }
            None => hasher.update([0u8]),
        }
        hasher.update(self.nonce.to_be_bytes());
        RequestId(finish(hasher))
    }
}
