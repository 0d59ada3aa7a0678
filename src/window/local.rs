//! Process-local window cache.
//!
//! The current window is an immutable `Arc<Window<T>>`. A refill never edits
//! the old window; it builds a new one and swaps the `Arc` while holding the
//! refill lock. Readers that still hold the previous `Arc` keep slicing a
//! self-consistent buffer.
//!
//! The cursor belongs to the window and only moves through compare-and-swap,
//! so two callers slicing the same window always get disjoint ranges. A
//! caller racing a refill may see a shorter slice than a strictly serialized
//! schedule would give, but never an overlapping one.

use std::ops::Range;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::metrics::WindowMetrics;
use crate::source::PullSource;
use crate::window::{WindowCache, WindowError, DEFAULT_AMPLIFICATION};

const VARIANT: &str = "local";

/// Refill policy for a [`LocalWindowCache`].
#[derive(Debug, Clone)]
pub struct WindowConfig {
    /// How long a freshly pulled batch stays valid.
    pub ttl: Duration,

    /// Pull size used when a refill is triggered by a zero-sized request.
    pub default_pull_size: usize,

    /// Refills ask upstream for `requested * amplification` items.
    pub amplification: usize,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(30),
            default_pull_size: 10,
            amplification: DEFAULT_AMPLIFICATION,
        }
    }
}

/// Point-in-time view of the current window, for monitoring and tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSnapshot {
    pub total: usize,
    pub cursor: usize,
    pub generation: u64,
    pub expired: bool,
}

struct Window<T> {
    items: Vec<T>,

    /// `None` until the first successful non-empty pull.
    expires_at: Option<Instant>,

    /// Bumped on every buffer replacement; 0 is the initial empty window.
    generation: u64,

    cursor: AtomicUsize,
}

impl<T> Window<T> {
    fn new(items: Vec<T>, expires_at: Option<Instant>, generation: u64) -> Self {
        Self {
            items,
            expires_at,
            generation,
            cursor: AtomicUsize::new(0),
        }
    }

    fn total(&self) -> usize {
        self.items.len()
    }

    fn cursor(&self) -> usize {
        self.cursor.load(Ordering::Acquire)
    }

    fn remaining(&self) -> usize {
        self.total().saturating_sub(self.cursor())
    }

    fn is_expired(&self, now: Instant) -> bool {
        match self.expires_at {
            Some(at) => now > at,
            None => true,
        }
    }

    fn rewind(&self) {
        self.cursor.store(0, Ordering::Release);
    }

    /// Reserve up to `n` unread positions. The returned range is never handed
    /// to another caller of this window until the cursor is rewound.
    fn claim(&self, n: usize) -> Range<usize> {
        let total = self.total();
        let mut cur = self.cursor.load(Ordering::Acquire);
        loop {
            let start = cur.min(total);
            let end = start.saturating_add(n).min(total);
            if start == end {
                return start..end;
            }
            match self
                .cursor
                .compare_exchange_weak(cur, end, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return start..end,
                Err(actual) => cur = actual,
            }
        }
    }
}

/// In-memory pull-through window cache.
pub struct LocalWindowCache<T> {
    window: RwLock<Arc<Window<T>>>,

    /// Serializes refills; never held while slicing.
    refill_lock: Mutex<()>,

    source: Arc<dyn PullSource<T>>,

    config: WindowConfig,

    metrics: Option<WindowMetrics>,
}

impl<T> LocalWindowCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty cache. The first `next` call always pulls.
    pub fn new(source: Arc<dyn PullSource<T>>, config: WindowConfig) -> Self {
        Self {
            window: RwLock::new(Arc::new(Window::new(Vec::new(), None, 0))),
            refill_lock: Mutex::new(()),
            source,
            config,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: WindowMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    pub async fn snapshot(&self) -> WindowSnapshot {
        let window = self.current().await;
        WindowSnapshot {
            total: window.total(),
            cursor: window.cursor(),
            generation: window.generation,
            expired: window.is_expired(Instant::now()),
        }
    }

    async fn current(&self) -> Arc<Window<T>> {
        self.window.read().await.clone()
    }

    fn pull_size(&self, requested: usize) -> usize {
        if requested == 0 {
            self.config.default_pull_size
        } else {
            requested.saturating_mul(self.config.amplification)
        }
    }

    /// Replace the window from upstream. `seen` is the generation the caller
    /// based its decision on; if another caller already replaced it while we
    /// waited for the lock, there is nothing left to do.
    async fn refill(&self, seen: u64, requested: usize) -> Result<(), WindowError> {
        let _guard = self.refill_lock.lock().await;

        let current = self.current().await;
        if current.generation != seen {
            debug!(
                seen,
                generation = current.generation,
                "Window replaced while waiting for refill lock"
            );
            return Ok(());
        }

        let size = self.pull_size(requested);

        match self.source.pull(size).await {
            Err(err) => {
                if let Some(m) = &self.metrics {
                    m.pull_failures.with_label_values(&[VARIANT]).inc();
                }

                // Downgrade: replay whatever is buffered from the start.
                current.rewind();
                if current.total() > 0 {
                    warn!(
                        error = %err,
                        total = current.total(),
                        "Pull failed, serving stale window"
                    );
                    if let Some(m) = &self.metrics {
                        m.downgrades.with_label_values(&[VARIANT]).inc();
                    }
                    return Ok(());
                }

                warn!(error = %err, "Pull failed with no data to fall back on");
                Err(WindowError::Refresh { source: err })
            }
            Ok(items) if items.is_empty() => {
                debug!(size, "Pull returned no items");
                if let Some(m) = &self.metrics {
                    m.empty_pulls.with_label_values(&[VARIANT]).inc();
                }
                let next = Window::new(Vec::new(), current.expires_at, current.generation + 1);
                *self.window.write().await = Arc::new(next);
                Ok(())
            }
            Ok(items) => {
                let total = items.len();
                let next = Window::new(
                    items,
                    Some(Instant::now() + self.config.ttl),
                    current.generation + 1,
                );
                *self.window.write().await = Arc::new(next);

                if let Some(m) = &self.metrics {
                    m.refills.with_label_values(&[VARIANT]).inc();
                }
                debug!(
                    size,
                    total,
                    generation = current.generation + 1,
                    "Window refilled"
                );
                Ok(())
            }
        }
    }
}

#[async_trait]
impl<T> WindowCache<T> for LocalWindowCache<T>
where
    T: Clone + Send + Sync + 'static,
{
    async fn next(&self, requested: usize) -> Result<Vec<T>, WindowError> {
        let window = self.current().await;

        if window.remaining() < requested || window.is_expired(Instant::now()) {
            self.refill(window.generation, requested).await?;
        }

        let window = self.current().await;
        let range = window.claim(requested);
        let items = window.items[range.clone()].to_vec();

        debug!(
            requested,
            start = range.start,
            end = range.end,
            total = window.total(),
            "Served window slice"
        );
        if let Some(m) = &self.metrics {
            m.record_served(VARIANT, requested, items.len());
        }

        Ok(items)
    }
}
