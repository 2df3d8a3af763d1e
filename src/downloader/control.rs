//! Cooperative cancellation shared between a session and its running engine.
//!
//! The session hands a `CancelFlag` to the engine for each run. `cancel()` sets it;
//! the engine checks it while working and unwinds on its own schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_state() {
        let flag = CancelFlag::new();
        let seen_by_engine = flag.clone();
        assert!(!seen_by_engine.is_canceled());
        flag.cancel();
        flag.cancel();
        assert!(seen_by_engine.is_canceled());
    }
}
