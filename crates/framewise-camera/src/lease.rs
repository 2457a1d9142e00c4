//! Outstanding-frame accounting. Every frame handed out carries a lease whose
//! drop is counted here exactly once.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use framewise_overlay::frame::FrameLease;
use tracing::trace;

#[derive(Debug, Default)]
struct Counters {
    outstanding: AtomicUsize,
    issued: AtomicU64,
    released: AtomicU64,
}

#[derive(Debug, Clone)]
pub struct LeaseTracker {
    max_outstanding: usize,
    counters: Arc<Counters>,
}

impl LeaseTracker {
    pub fn new(max_outstanding: usize) -> Self {
        Self { max_outstanding: max_outstanding.max(1), counters: Arc::default() }
    }

    /// `None` once `max_outstanding` frames are out.
    pub fn try_acquire(&self) -> Option<FrameLease> {
        let c = &self.counters;
        c.outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < self.max_outstanding).then_some(n + 1))
            .ok()?;
        let id = c.issued.fetch_add(1, Ordering::Relaxed) + 1;
        let counters = self.counters.clone();
        Some(FrameLease::new(id, move |id| {
            counters.outstanding.fetch_sub(1, Ordering::AcqRel);
            counters.released.fetch_add(1, Ordering::Relaxed);
            trace!(frame = id, "frame released");
        }))
    }

    pub fn at_capacity(&self) -> bool {
        self.outstanding() >= self.max_outstanding
    }

    pub fn outstanding(&self) -> usize {
        self.counters.outstanding.load(Ordering::Acquire)
    }

    pub fn issued(&self) -> u64 {
        self.counters.issued.load(Ordering::Relaxed)
    }

    pub fn released(&self) -> u64 {
        self.counters.released.load(Ordering::Relaxed)
    }
}
