//! Control flags shared between a caller thread and a sampler thread.

use std::sync::atomic::{AtomicBool, Ordering};

/// Sampling on/off plus a one-way termination flag.
///
/// Every operation is a single atomic store or load, so the caller never
/// blocks on the sampler.
#[derive(Debug, Default)]
pub struct Lifecycle {
    sampling: AtomicBool,
    terminated: AtomicBool,
}

impl Lifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enable(&self) {
        self.sampling.store(true, Ordering::Release);
    }

    pub fn disable(&self) {
        self.sampling.store(false, Ordering::Release);
    }

    /// Marks the lifecycle as finished. Returns `true` only for the call
    /// that performed the transition.
    pub fn terminate(&self) -> bool {
        !self.terminated.swap(true, Ordering::AcqRel)
    }

    pub fn is_sampling(&self) -> bool {
        self.sampling.load(Ordering::Acquire)
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }
}
