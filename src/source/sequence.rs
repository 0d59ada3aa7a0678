//! Synthetic upstream: hands out consecutive integers across calls.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::source::{PullError, PullSource};

/// Produces `start, start+1, ...` with no value repeated across pulls.
pub struct SequenceSource {
    next: AtomicU64,

    /// Upper bound on a single batch (0 = honour the request exactly).
    max_batch: usize,

    pulls: AtomicUsize,
}

impl SequenceSource {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
            max_batch: 0,
            pulls: AtomicUsize::new(0),
        }
    }

    /// Cap every batch at `max_batch` items.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch;
        self
    }

    /// Number of pulls served so far.
    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PullSource<u64> for SequenceSource {
    async fn pull(&self, requested: usize) -> Result<Vec<u64>, PullError> {
        let n = if self.max_batch > 0 {
            requested.min(self.max_batch)
        } else {
            requested
        };
        let start = self.next.fetch_add(n as u64, Ordering::Relaxed);
        self.pulls.fetch_add(1, Ordering::Relaxed);

        debug!(requested, served = n, start, "Sequence pull");

        Ok((start..start + n as u64).collect())
    }
}
