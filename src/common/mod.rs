pub mod crypto;
pub mod hashing;
pub mod ids;

pub use ids::*;

/// Position of a member inside a committee.
pub type PeerIndex = u16;
