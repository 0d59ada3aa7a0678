//! Store-backed window cache.
//!
//! All window state (items, cursor, total, expiry) lives in a [`Store`] under
//! the keys of one [`CacheKeySet`]. Any number of caches, in any number of
//! processes, using the same prefix against the same store consume one
//! window. The calling process holds no authoritative copy.
//!
//! There is no critical section spanning round trips. In
//! [`CursorMode::Snapshot`] the slice bounds come from a cursor read made
//! before the increment, so concurrent consumers of one window can receive
//! overlapping slices. [`CursorMode::Reserved`] derives the bounds from the
//! value the increment returns and closes that gap.
//!
//! An increment that succeeds on the server but whose reply is lost (timeout)
//! still advances the cursor; retrying it would double count, so no call here
//! is retried.

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::metrics::WindowMetrics;
use crate::source::PullSource;
use crate::store::{Store, StoreError};
use crate::window::{CacheKeySet, WindowCache, WindowError};

const VARIANT: &str = "shared";

/// Value stored in cursor/total/expire-at before the first successful pull.
pub const SENTINEL: i64 = -1;

/// How slice bounds are derived from the shared cursor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CursorMode {
    /// Read the cursor, increment it, slice from the value read.
    #[default]
    Snapshot,

    /// Increment the cursor and slice from the value the increment returns.
    Reserved,
}

#[derive(Debug, Clone)]
pub struct SharedWindowConfig {
    /// Prefix all four store keys are derived from.
    pub key_prefix: String,

    /// Batch size requested from upstream on every refill.
    pub pull_size: usize,

    pub ttl: Duration,

    /// Upper bound on every single store round trip.
    pub op_timeout: Duration,

    pub cursor_mode: CursorMode,
}

impl Default for SharedWindowConfig {
    fn default() -> Self {
        Self {
            key_prefix: "window".to_string(),
            pull_size: 20,
            ttl: Duration::from_secs(30),
            op_timeout: Duration::from_secs(1),
            cursor_mode: CursorMode::Snapshot,
        }
    }
}

/// Raw bookkeeping values as currently held by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SharedWindowState {
    pub cursor: i64,
    pub total: i64,
    pub expire_at: i64,
}

/// Outcome of one refill attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Refill {
    Filled,
    Empty,
    Downgraded,
}

pub struct SharedWindowCache<T, S> {
    store: S,
    source: Arc<dyn PullSource<T>>,
    keys: CacheKeySet,
    config: SharedWindowConfig,
    metrics: Option<WindowMetrics>,
    _item: PhantomData<fn() -> T>,
}

fn unix_now() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

impl<T, S> SharedWindowCache<T, S>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Store,
{
    /// Create a cache and reset the window's bookkeeping keys to the sentinel,
    /// so the first call pulls.
    pub async fn new(
        store: S,
        source: Arc<dyn PullSource<T>>,
        config: SharedWindowConfig,
    ) -> Result<Self, WindowError> {
        let cache = Self::attach(store, source, config);
        cache.init_keys().await?;
        Ok(cache)
    }

    /// Join an existing window without touching its keys.
    pub fn attach(store: S, source: Arc<dyn PullSource<T>>, config: SharedWindowConfig) -> Self {
        let keys = CacheKeySet::new(&config.key_prefix);
        Self {
            store,
            source,
            keys,
            config,
            metrics: None,
            _item: PhantomData,
        }
    }

    pub fn with_metrics(mut self, metrics: WindowMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn keys(&self) -> &CacheKeySet {
        &self.keys
    }

    pub fn config(&self) -> &SharedWindowConfig {
        &self.config
    }

    pub async fn state(&self) -> Result<SharedWindowState, WindowError> {
        Ok(SharedWindowState {
            cursor: self.cursor().await?,
            total: self.total().await?,
            expire_at: self.expire_at().await?,
        })
    }

    async fn init_keys(&self) -> Result<(), WindowError> {
        self.set_total(SENTINEL).await?;
        self.set_cursor(SENTINEL).await?;
        self.set_expire_at(SENTINEL).await?;
        debug!(prefix = %self.config.key_prefix, "Initialized shared window keys");
        Ok(())
    }

    /// Run one store round trip under the per-operation timeout.
    async fn call<R>(
        &self,
        op: &'static str,
        fut: impl Future<Output = Result<R, StoreError>>,
    ) -> Result<R, WindowError> {
        match tokio::time::timeout(self.config.op_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(source)) => Err(WindowError::Store { op, source }),
            Err(_) => Err(WindowError::Timeout { op }),
        }
    }

    async fn get_int(&self, op: &'static str, key: &str) -> Result<i64, WindowError> {
        Ok(self
            .call(op, self.store.get_int(key))
            .await?
            .unwrap_or(SENTINEL))
    }

    async fn cursor(&self) -> Result<i64, WindowError> {
        self.get_int("get cur key", &self.keys.cursor).await
    }

    async fn total(&self) -> Result<i64, WindowError> {
        self.get_int("get total key", &self.keys.total).await
    }

    async fn expire_at(&self) -> Result<i64, WindowError> {
        self.get_int("get expire at key", &self.keys.expire_at).await
    }

    async fn set_cursor(&self, value: i64) -> Result<(), WindowError> {
        self.call("set cur key", self.store.set_int(&self.keys.cursor, value))
            .await
    }

    async fn set_total(&self, value: i64) -> Result<(), WindowError> {
        self.call("set total key", self.store.set_int(&self.keys.total, value))
            .await
    }

    async fn set_expire_at(&self, value: i64) -> Result<(), WindowError> {
        self.call(
            "set expire at key",
            self.store.set_int(&self.keys.expire_at, value),
        )
        .await
    }

    async fn incr_cursor(&self, delta: i64) -> Result<i64, WindowError> {
        self.call("incr cur key", self.store.incr(&self.keys.cursor, delta))
            .await
    }

    async fn set_data(&self, items: &[T]) -> Result<(), WindowError> {
        let encoded = items
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|source| WindowError::Encode {
                op: "set data key",
                source,
            })?;
        self.call("set data key", self.store.set_list(&self.keys.data, encoded))
            .await
    }

    async fn range_data(&self, start: i64, end: i64) -> Result<Vec<T>, WindowError> {
        let raw = self
            .call("range data key", self.store.range(&self.keys.data, start, end))
            .await?;
        raw.iter()
            .map(|s| serde_json::from_str(s))
            .collect::<Result<Vec<T>, _>>()
            .map_err(|source| WindowError::Decode {
                op: "range data key",
                source,
            })
    }

    async fn refill(&self) -> Result<Refill, WindowError> {
        let items = match self.source.pull(self.config.pull_size).await {
            Ok(items) => items,
            Err(err) => {
                if let Some(m) = &self.metrics {
                    m.pull_failures.with_label_values(&[VARIANT]).inc();
                }

                let total = self.total().await?;
                if total <= 0 {
                    warn!(error = %err, "Pull failed with no shared data to fall back on");
                    return Err(WindowError::Refresh { source: err });
                }

                self.set_cursor(0).await?;
                warn!(error = %err, total, "Pull failed, serving stale shared window");
                if let Some(m) = &self.metrics {
                    m.downgrades.with_label_values(&[VARIANT]).inc();
                }
                return Ok(Refill::Downgraded);
            }
        };

        if items.is_empty() {
            debug!(pull_size = self.config.pull_size, "Pull returned no items");
            if let Some(m) = &self.metrics {
                m.empty_pulls.with_label_values(&[VARIANT]).inc();
            }
            return Ok(Refill::Empty);
        }

        let total = items.len();
        self.set_data(&items).await?;
        self.set_total(total as i64).await?;
        self.set_cursor(0).await?;
        self.set_expire_at(unix_now() + self.config.ttl.as_secs() as i64)
            .await?;

        if let Some(m) = &self.metrics {
            m.refills.with_label_values(&[VARIANT]).inc();
        }
        debug!(total, prefix = %self.config.key_prefix, "Shared window refilled");

        Ok(Refill::Filled)
    }

    /// Advance the cursor by up to `requested` and return the bounds to read.
    async fn reserve(
        &self,
        cursor: i64,
        total: i64,
        requested: usize,
    ) -> Result<(i64, i64), WindowError> {
        let delta = i64::try_from(requested)
            .unwrap_or(i64::MAX)
            .min(total - cursor);

        match self.config.cursor_mode {
            CursorMode::Snapshot => {
                self.incr_cursor(delta).await?;
                Ok((cursor, cursor + delta))
            }
            CursorMode::Reserved => {
                let after = self.incr_cursor(delta).await?;
                let start = (after - delta).max(0);
                Ok((start, after.min(total)))
            }
        }
    }
}

#[async_trait]
impl<T, S> WindowCache<T> for SharedWindowCache<T, S>
where
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
    S: Store,
{
    async fn next(&self, requested: usize) -> Result<Vec<T>, WindowError> {
        let expire_at = self.expire_at().await?;
        if expire_at == SENTINEL || unix_now() > expire_at {
            let outcome = self.refill().await?;
            debug!(?outcome, expire_at, "Refill on expiry");
        }

        let mut cursor = self.cursor().await?;
        let mut total = self.total().await?;

        if cursor >= total {
            let outcome = self.refill().await?;
            debug!(?outcome, cursor, total, "Refill on exhaustion");
            cursor = self.cursor().await?;
            total = self.total().await?;
        }

        // Nothing buffered yet, or a peer drained the window since the refill.
        if requested == 0 || total <= 0 || cursor < 0 || cursor >= total {
            if let Some(m) = &self.metrics {
                m.record_served(VARIANT, requested, 0);
            }
            return Ok(Vec::new());
        }

        let (start, end) = self.reserve(cursor, total, requested).await?;
        let items = if end > start {
            self.range_data(start, end).await?
        } else {
            Vec::new()
        };

        debug!(requested, start, end, total, "Served shared window slice");
        if let Some(m) = &self.metrics {
            m.record_served(VARIANT, requested, items.len());
        }

        Ok(items)
    }
}
