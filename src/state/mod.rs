pub mod block;
pub mod error;
pub mod layout;
pub mod must;
pub mod optimistic;
pub mod sync;
pub mod virtual_state;

pub use block::*;
pub use error::*;
pub use must::*;
pub use optimistic::*;
pub use sync::*;
pub use virtual_state::*;
