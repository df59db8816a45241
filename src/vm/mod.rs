pub mod context;
pub mod contract;
pub mod error;
pub mod essence;
pub mod request;
pub mod runner;
pub mod task;

#[cfg(test)]
pub(crate) mod testing;

pub use context::*;
pub use contract::*;
pub use error::*;
pub use essence::*;
pub use request::*;
pub use runner::*;
pub use task::*;
