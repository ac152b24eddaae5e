//! The live, read-lockless cancellation signal (§5) that node runners
//! poll between steps. Distinct from [`crate::Job::cancel_flag`], which
//! is the persisted, mutex-guarded view of the same fact: the
//! orchestrator raises both when a Stop is requested, but only this one
//! needs to be cheap to read from a hot loop with no lock at all.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A monotonic, clone-cheap cancellation flag shared between a Job's
/// worker task and its Node runner tasks.
#[derive(Debug, Clone, Default)]
pub struct CancelLatch(Arc<AtomicBool>);

impl CancelLatch {
    /// A freshly lowered latch.
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    /// Raise the latch. Idempotent; never lowers.
    pub fn raise(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Whether the latch has been raised.
    #[must_use]
    pub fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}
