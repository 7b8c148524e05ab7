//! One-shot segment completion

use std::sync::atomic::{AtomicBool, Ordering};

/// Latch shared by the end-of-media event and the progress sampler
///
/// Whichever signal arrives first wins; the other one is ignored.
#[derive(Debug, Default)]
pub struct CompletionLatch {
    fired: AtomicBool,
}

impl CompletionLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` only for the first call
    pub fn fire(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }

    pub fn has_fired(&self) -> bool {
        self.fired.load(Ordering::Acquire)
    }
}
