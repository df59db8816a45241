use thiserror::Error;

use crate::kv::{DecodeError, StoreError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    /// Block does not extend this state. Fatal to the state instance.
    #[error("consistency error: {0}")]
    Consistency(String),
    /// The read baseline was invalidated by a concurrent commit. Retry with a
    /// fresh baseline.
    #[error("virtual state has been invalidated")]
    Invalidated,
    #[error("{0} not found in state")]
    NotFound(&'static str),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("encoding failure: {0}")]
    Encode(String),
}
