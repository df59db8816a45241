use std::fmt;

use serde::{Deserialize, Serialize};

use super::crypto::Pubkey;
use super::hashing::{hash_data, HashValue};

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct ChainId(pub [u8; 32]);

impl ChainId {
    pub fn from_name(name: &str) -> Self {
        ChainId(hash_data(&[b"chain:", name.as_bytes()]).0)
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

impl fmt::Debug for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainId({})", self)
    }
}

/// 32-bit hashed name of a contract or entry point.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct Hname(pub u32);

impl Hname {
    pub fn from_name(name: &str) -> Self {
        let h = hash_data(&[name.as_bytes()]);
        Hname(u32::from_le_bytes([h.0[0], h.0[1], h.0[2], h.0[3]]))
    }

    pub fn to_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for Hname {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}

/// Anything that can hold or send funds: a contract on some chain or an
/// external key holder.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct AgentId(pub HashValue);

impl AgentId {
    pub fn for_contract(chain: &ChainId, contract: Hname) -> Self {
        AgentId(hash_data(&[b"contract:", &chain.0, &contract.to_bytes()]))
    }

    pub fn for_pubkey(pubkey: &Pubkey) -> Self {
        AgentId(hash_data(&[b"key:", pubkey.as_ref()]))
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short())
    }
}

/// Content-derived request identity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct RequestId(pub HashValue);

impl RequestId {
    pub fn short(&self) -> String {
        self.0.short()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.short())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hname_is_stable() {
        assert_eq!(Hname::from_name("counter"), Hname::from_name("counter"));
        assert_ne!(Hname::from_name("counter"), Hname::from_name("root"));
    }

    #[test]
    fn test_contract_agent_depends_on_chain() {
        let h = Hname::from_name("counter");
        let a = AgentId::for_contract(&ChainId::from_name("a"), h);
        let b = AgentId::for_contract(&ChainId::from_name("b"), h);
        assert_ne!(a, b);
    }
}
