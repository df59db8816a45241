use std::collections::BTreeMap;

use parking_lot::RwLock;

use crate::common::crypto::Pubkey;
use crate::common::hashing::hash_data;
use crate::common::PeerIndex;

use super::RoundError;

/// Read-mostly membership table of one chain's committee.
#[derive(Debug, Default)]
pub struct PeerDirectory {
    members: RwLock<BTreeMap<PeerIndex, Pubkey>>,
}

impl PeerDirectory {
    pub fn new(members: BTreeMap<PeerIndex, Pubkey>) -> Self {
        PeerDirectory {
            members: RwLock::new(members),
        }
    }

    /// Members indexed by their position in `keys`.
    pub fn from_pubkeys(keys: Vec<Pubkey>) -> Self {
        PeerDirectory::new(
            keys.into_iter()
                .enumerate()
                .map(|(i, k)| (i as PeerIndex, k))
                .collect(),
        )
    }

    pub fn insert(&self, index: PeerIndex, key: Pubkey) {
        self.members.write().insert(index, key);
    }

    pub fn remove(&self, index: PeerIndex) -> Option<Pubkey> {
        self.members.write().remove(&index)
    }

    pub fn get(&self, index: PeerIndex) -> Option<Pubkey> {
        self.members.read().get(&index).cloned()
    }

    pub fn is_member(&self, index: PeerIndex) -> bool {
        self.members.read().contains_key(&index)
    }

    pub fn len(&self) -> usize {
        self.members.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.read().is_empty()
    }

    pub fn snapshot(&self) -> BTreeMap<PeerIndex, Pubkey> {
        self.members.read().clone()
    }
}

/// Committee as seen by one round. Taken once at round start and never
/// updated, so membership changes only affect later rounds.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CommitteeDescriptor {
    own_index: PeerIndex,
    members: Vec<PeerIndex>,
    quorum: usize,
}

impl CommitteeDescriptor {
    pub fn capture(
        directory: &PeerDirectory,
        own_index: PeerIndex,
        quorum: usize,
    ) -> Result<Self, RoundError> {
        let members: Vec<PeerIndex> = directory.members.read().keys().copied().collect();
        if !members.contains(&own_index) {
            return Err(RoundError::Committee(format!(
                "own index #{} is not in the committee",
                own_index
            )));
        }
        if quorum == 0 || quorum > members.len() {
            return Err(RoundError::Committee(format!(
                "quorum {} is impossible with {} members",
                quorum,
                members.len()
            )));
        }
        Ok(CommitteeDescriptor {
            own_index,
            members,
            quorum,
        })
    }

    pub fn own_index(&self) -> PeerIndex {
        self.own_index
    }

    pub fn members(&self) -> &[PeerIndex] {
        &self.members
    }

    pub fn size(&self) -> usize {
        self.members.len()
    }

    pub fn quorum(&self) -> usize {
        self.quorum
    }

    pub fn is_member(&self, index: PeerIndex) -> bool {
        self.members.binary_search(&index).is_ok()
    }

    pub fn leader_for(&self, session_id: u64, state_index: u32) -> PeerIndex {
        // `capture` guarantees a non-empty member list
        select_leader(session_id, state_index, &self.members).unwrap_or(self.own_index)
    }
}

/// Deterministic leader of a round. Every member computes the same index
/// from the same session and state index, no messages involved.
pub fn select_leader(session_id: u64, state_index: u32, members: &[PeerIndex]) -> Option<PeerIndex> {
    if members.is_empty() {
        return None;
    }
    let seed = hash_data(&[&session_id.to_be_bytes(), &state_index.to_be_bytes()]);
    let mut head = [0u8; 8];
    head.copy_from_slice(&seed.0[..8]);
    let pos = u64::from_be_bytes(head) % members.len() as u64;
    members.get(pos as usize).copied()
}
