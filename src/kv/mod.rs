pub mod buffered;
pub mod codec;
pub mod mutations;
pub mod store;

pub use buffered::*;
pub use codec::*;
pub use mutations::*;
pub use store::*;
