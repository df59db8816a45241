use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::StateError;

/// Shared monotonic version of one chain's committed state.
///
/// The version is odd while a commit is being written and even otherwise. A
/// baseline captured at version `v` is valid only while `v` is even and the
/// shared version still equals `v`.
#[derive(Clone, Default, Debug)]
pub struct StateSync {
    version: Arc<AtomicU64>,
}

impl StateSync {
    pub fn new() -> Self {
        StateSync::default()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn baseline(&self) -> StateBaseline {
        StateBaseline {
            version: self.version.clone(),
            captured: self.version(),
        }
    }

    /// Opens a write window. Every baseline taken before the window closes is
    /// invalid afterwards.
    pub fn begin_write(&self) -> WriteWindow<'_> {
        self.version.fetch_add(1, Ordering::AcqRel);
        WriteWindow { sync: self }
    }
}

pub struct WriteWindow<'a> {
    sync: &'a StateSync,
}

impl Drop for WriteWindow<'_> {
    fn drop(&mut self) {
        self.sync.version.fetch_add(1, Ordering::Release);
    }
}

#[derive(Clone, Debug)]
pub struct StateBaseline {
    version: Arc<AtomicU64>,
    captured: u64,
}

impl StateBaseline {
    pub fn is_valid(&self) -> bool {
        self.captured % 2 == 0 && self.version.load(Ordering::Acquire) == self.captured
    }

    pub fn validate(&self) -> Result<(), StateError> {
        if self.is_valid() {
            Ok(())
        } else {
            Err(StateError::Invalidated)
        }
    }

    /// Panics with `StateError::Invalidated`. Only for the fail-fast layer.
    pub fn must_validate(&self) {
        if !self.is_valid() {
            panic!("{}", StateError::Invalidated);
        }
    }

    pub fn set_baseline(&mut self) {
        self.captured = self.version.load(Ordering::Acquire);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_invalidates_baseline() {
        let sync = StateSync::new();
        let mut baseline = sync.baseline();
        assert!(baseline.is_valid());

        {
            let _window = sync.begin_write();
            assert!(!baseline.is_valid());
            let during = sync.baseline();
            assert!(!during.is_valid());
        }
        assert_eq!(baseline.validate(), Err(StateError::Invalidated));

        baseline.set_baseline();
        assert!(baseline.is_valid());
    }
}
