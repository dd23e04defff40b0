//! Cooperative cancellation.
//!
//! Long-running derivations call [`AbortSignal::check`] at their loop heads. The
//! signal is raised from outside the core (a timeout, a cancelled query) and every
//! checkpoint then unwinds with [`OptimizerError::AbortRequested`]. Work already
//! committed to the memo under its locks stays valid.

use crate::error::{OptimizerError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_abort(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_requested(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    pub fn check(&self) -> Result<()> {
        if self.is_requested() {
            Err(OptimizerError::AbortRequested)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_the_flag() {
        let signal = AbortSignal::new();
        let observer = signal.clone();
        assert!(observer.check().is_ok());

        signal.request_abort();
        assert_eq!(observer.check(), Err(OptimizerError::AbortRequested));
    }
}
