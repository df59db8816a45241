use std::collections::BTreeMap;
use std::sync::Arc;

use crate::common::Hname;

use super::context::ExecutionContext;
use super::request::Params;
use super::VmError;

/// A deployed contract. Implementations must be deterministic: all
/// randomness comes from the context, never from the clock or I/O.
pub trait Contract: Send + Sync {
    fn name(&self) -> &str;

    fn hname(&self) -> Hname {
        Hname::from_name(self.name())
    }

    fn call(&self, ctx: &mut ExecutionContext<'_>, entry_point: Hname) -> Result<Params, VmError>;
}

#[derive(Default, Clone)]
pub struct ContractRegistry {
    contracts: BTreeMap<Hname, Arc<dyn Contract>>,
}

impl ContractRegistry {
    pub fn new() -> Self {
        ContractRegistry::default()
    }

    pub fn register(&mut self, contract: Arc<dyn Contract>) -> Hname {
        let hname = contract.hname();
        self.contracts.insert(hname, contract);
        hname
    }

    pub fn with(mut self, contract: Arc<dyn Contract>) -> Self {
        self.register(contract);
        self
    }

    pub fn get(&self, hname: Hname) -> Option<&Arc<dyn Contract>> {
        self.contracts.get(&hname)
    }

    pub fn len(&self) -> usize {
        self.contracts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.contracts.is_empty()
    }
}
