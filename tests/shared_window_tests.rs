//! Integration tests for the store-backed window cache.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Barrier;
use window_cache::source::{FnSource, PullError, PullSource, SequenceSource};
use window_cache::store::{InMemoryStore, Store, StoreError};
use window_cache::window::shared::SENTINEL;
use window_cache::window::{
    CursorMode, SharedWindowCache, SharedWindowConfig, WindowCache, WindowError,
};

fn config(prefix: &str) -> SharedWindowConfig {
    SharedWindowConfig {
        key_prefix: prefix.to_string(),
        pull_size: 20,
        ttl: Duration::from_secs(30),
        ..Default::default()
    }
}

fn thirteen() -> Vec<String> {
    (1..=13).map(|i| i.to_string()).collect()
}

/// Always returns the same thirteen strings and counts pulls.
fn fixed_source(pulls: Arc<AtomicUsize>) -> Arc<dyn PullSource<String>> {
    Arc::new(FnSource::new(move |_n: usize| {
        pulls.fetch_add(1, Ordering::SeqCst);
        Ok(thirteen())
    }))
}

fn switchable_source(failing: Arc<AtomicBool>) -> Arc<dyn PullSource<String>> {
    Arc::new(FnSource::new(move |_n: usize| {
        if failing.load(Ordering::SeqCst) {
            Err(PullError::Upstream("upstream unavailable".to_string()))
        } else {
            Ok(thirteen())
        }
    }))
}

fn strs(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Store whose reads or increments can be switched to fail with a transport
/// error. Clones share the switches and the underlying map.
#[derive(Clone, Default)]
struct FailingStore {
    inner: InMemoryStore,
    fail_incr: Arc<AtomicBool>,
    fail_get: Arc<AtomicBool>,
}

#[async_trait]
impl Store for FailingStore {
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        if self.fail_get.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        self.inner.get_int(key).await
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.set_int(key, value).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        if self.fail_incr.load(Ordering::SeqCst) {
            return Err(StoreError::Transport("connection reset".to_string()));
        }
        self.inner.incr(key, delta).await
    }

    async fn set_list(&self, key: &str, items: Vec<String>) -> Result<(), StoreError> {
        self.inner.set_list(key, items).await
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, StoreError> {
        self.inner.range(key, start, end).await
    }
}

/// Store that never answers reads in time.
struct SlowStore {
    inner: InMemoryStore,
    delay: Duration,
}

#[async_trait]
impl Store for SlowStore {
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        tokio::time::sleep(self.delay).await;
        self.inner.get_int(key).await
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.set_int(key, value).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.incr(key, delta).await
    }

    async fn set_list(&self, key: &str, items: Vec<String>) -> Result<(), StoreError> {
        self.inner.set_list(key, items).await
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, StoreError> {
        self.inner.range(key, start, end).await
    }
}

/// Store that, once armed, holds every cursor read at a two-party barrier,
/// so two consumers both read the cursor before either increments it.
#[derive(Clone)]
struct LockstepStore {
    inner: InMemoryStore,
    armed: Arc<AtomicBool>,
    barrier: Arc<Barrier>,
}

impl LockstepStore {
    fn new() -> Self {
        Self {
            inner: InMemoryStore::new(),
            armed: Arc::new(AtomicBool::new(false)),
            barrier: Arc::new(Barrier::new(2)),
        }
    }
}

#[async_trait]
impl Store for LockstepStore {
    async fn get_int(&self, key: &str) -> Result<Option<i64>, StoreError> {
        let value = self.inner.get_int(key).await?;
        if self.armed.load(Ordering::SeqCst) && key.ends_with("-cur") {
            self.barrier.wait().await;
        }
        Ok(value)
    }

    async fn set_int(&self, key: &str, value: i64) -> Result<(), StoreError> {
        self.inner.set_int(key, value).await
    }

    async fn incr(&self, key: &str, delta: i64) -> Result<i64, StoreError> {
        self.inner.incr(key, delta).await
    }

    async fn set_list(&self, key: &str, items: Vec<String>) -> Result<(), StoreError> {
        self.inner.set_list(key, items).await
    }

    async fn range(&self, key: &str, start: i64, end: i64) -> Result<Vec<String>, StoreError> {
        self.inner.range(key, start, end).await
    }
}

/// Two consumers of one window read the cursor in lockstep, then both take
/// three items. Returns both slices and the final cursor.
async fn lockstep_pair(mode: CursorMode) -> (Vec<String>, Vec<String>, i64) {
    let store = LockstepStore::new();
    let pulls = Arc::new(AtomicUsize::new(0));
    let cfg = SharedWindowConfig {
        cursor_mode: mode,
        ..config("lockstep")
    };

    let first = SharedWindowCache::new(store.clone(), fixed_source(pulls.clone()), cfg.clone())
        .await
        .unwrap();
    let second = SharedWindowCache::attach(store.clone(), fixed_source(pulls), cfg);
    assert_eq!(first.next(3).await.unwrap(), strs(&["1", "2", "3"]));

    store.armed.store(true, Ordering::SeqCst);
    let (a, b) = tokio::join!(first.next(3), second.next(3));
    store.armed.store(false, Ordering::SeqCst);

    let cursor = store.inner.get_int("lockstep-cur").await.unwrap().unwrap();
    (a.unwrap(), b.unwrap(), cursor)
}

#[tokio::test]
async fn test_contiguous_windows_then_transparent_refill() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let cache = SharedWindowCache::new(
        InMemoryStore::new(),
        fixed_source(pulls.clone()),
        config("test_key"),
    )
    .await
    .unwrap();

    let mut calls = Vec::new();
    for _ in 0..10 {
        calls.push(cache.next(3).await.unwrap());
    }

    let cycle = vec![
        strs(&["1", "2", "3"]),
        strs(&["4", "5", "6"]),
        strs(&["7", "8", "9"]),
        strs(&["10", "11", "12"]),
        strs(&["13"]),
    ];
    assert_eq!(calls[..5], cycle[..]);
    assert_eq!(calls[5..], cycle[..]);
    assert_eq!(pulls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_store_holds_window_bookkeeping() {
    let store = InMemoryStore::new();
    let pulls = Arc::new(AtomicUsize::new(0));
    let cache = SharedWindowCache::new(store.clone(), fixed_source(pulls), config("wire"))
        .await
        .unwrap();

    cache.next(3).await.unwrap();

    assert_eq!(store.get_int("wire-total").await.unwrap(), Some(13));
    assert_eq!(store.get_int("wire-cur").await.unwrap(), Some(3));
    assert!(store.get_int("wire-expire-at").await.unwrap().unwrap() > 0);
    assert_eq!(store.range("wire-data", 0, 2).await.unwrap(), vec!["\"1\"", "\"2\""]);
}

#[tokio::test]
async fn test_refill_on_expiry() {
    let store = InMemoryStore::new();
    let pulls = Arc::new(AtomicUsize::new(0));
    let cache = SharedWindowCache::new(store.clone(), fixed_source(pulls.clone()), config("exp"))
        .await
        .unwrap();

    assert_eq!(cache.next(3).await.unwrap(), strs(&["1", "2", "3"]));

    // Ten items remain, but the batch is stale.
    store.set_int("exp-expire-at", 1).await.unwrap();
    assert_eq!(cache.next(3).await.unwrap(), strs(&["1", "2", "3"]));
    assert_eq!(pulls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_downgrade_on_pull_failure() {
    let store = InMemoryStore::new();
    let failing = Arc::new(AtomicBool::new(false));
    let cache = SharedWindowCache::new(store.clone(), switchable_source(failing.clone()), config("dg"))
        .await
        .unwrap();

    for _ in 0..5 {
        cache.next(3).await.unwrap();
    }
    assert_eq!(store.get_int("dg-cur").await.unwrap(), Some(13));

    failing.store(true, Ordering::SeqCst);

    // Exhausted, refill fails, existing data replays from the start.
    assert_eq!(cache.next(3).await.unwrap(), strs(&["1", "2", "3"]));
    assert_eq!(store.get_int("dg-cur").await.unwrap(), Some(3));
}

#[tokio::test]
async fn test_failure_without_data_is_fatal() {
    let failing = Arc::new(AtomicBool::new(true));
    let cache = SharedWindowCache::new(InMemoryStore::new(), switchable_source(failing), config("fatal"))
        .await
        .unwrap();

    let err = cache.next(3).await.unwrap_err();
    assert!(matches!(err, WindowError::Refresh { .. }));
}

#[tokio::test]
async fn test_empty_pull_leaves_state_untouched() {
    let store = InMemoryStore::new();
    let pulls = Arc::new(AtomicUsize::new(0));
    let counted = pulls.clone();
    let source: Arc<dyn PullSource<String>> = Arc::new(FnSource::new(move |_n: usize| {
        counted.fetch_add(1, Ordering::SeqCst);
        Ok(Vec::<String>::new())
    }));
    let cache = SharedWindowCache::new(store.clone(), source, config("empty"))
        .await
        .unwrap();

    assert!(cache.next(3).await.unwrap().is_empty());
    let state = cache.state().await.unwrap();
    assert_eq!(state.total, SENTINEL);
    assert_eq!(state.cursor, SENTINEL);
    assert_eq!(state.expire_at, SENTINEL);

    // Still sentinel, so the next call tries again.
    let before = pulls.load(Ordering::SeqCst);
    assert!(cache.next(3).await.unwrap().is_empty());
    assert!(pulls.load(Ordering::SeqCst) > before);
}

#[tokio::test]
async fn test_store_failure_is_tagged_with_operation() {
    let store = FailingStore::default();
    let pulls = Arc::new(AtomicUsize::new(0));
    let cache = SharedWindowCache::new(store.clone(), fixed_source(pulls.clone()), config("tag"))
        .await
        .unwrap();

    cache.next(3).await.unwrap();
    store.fail_get.store(true, Ordering::SeqCst);

    let err = cache.next(3).await.unwrap_err();
    match err {
        WindowError::Store { op, source } => {
            assert_eq!(op, "get expire at key");
            assert!(matches!(source, StoreError::Transport(_)));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_increment_surfaces() {
    let store = FailingStore::default();
    let pulls = Arc::new(AtomicUsize::new(0));
    let cache = SharedWindowCache::new(store.clone(), fixed_source(pulls), config("inc"))
        .await
        .unwrap();

    cache.next(3).await.unwrap();
    store.fail_incr.store(true, Ordering::SeqCst);

    let err = cache.next(3).await.unwrap_err();
    assert!(err.to_string().contains("incr cur key"));

    // The failed call left the cursor where it was.
    store.fail_incr.store(false, Ordering::SeqCst);
    assert_eq!(cache.next(3).await.unwrap(), strs(&["4", "5", "6"]));
}

#[tokio::test(start_paused = true)]
async fn test_slow_store_times_out() {
    let store = SlowStore {
        inner: InMemoryStore::new(),
        delay: Duration::from_secs(10),
    };
    let pulls = Arc::new(AtomicUsize::new(0));
    let cache = SharedWindowCache::new(
        store,
        fixed_source(pulls.clone()),
        SharedWindowConfig {
            op_timeout: Duration::from_millis(200),
            ..config("slow")
        },
    )
    .await
    .unwrap();

    let err = cache.next(3).await.unwrap_err();
    assert!(matches!(
        err,
        WindowError::Timeout {
            op: "get expire at key"
        }
    ));
    assert_eq!(pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_two_caches_share_one_window() {
    let store = InMemoryStore::new();
    let pulls = Arc::new(AtomicUsize::new(0));

    let first = SharedWindowCache::new(store.clone(), fixed_source(pulls.clone()), config("pair"))
        .await
        .unwrap();
    let second = SharedWindowCache::attach(store.clone(), fixed_source(pulls.clone()), config("pair"));

    assert_eq!(first.next(3).await.unwrap(), strs(&["1", "2", "3"]));
    assert_eq!(second.next(3).await.unwrap(), strs(&["4", "5", "6"]));
    assert_eq!(first.next(3).await.unwrap(), strs(&["7", "8", "9"]));
    assert_eq!(pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_reserved_mode_concurrent_consumers_never_overlap() {
    let store = InMemoryStore::new();
    let source: Arc<dyn PullSource<u64>> = Arc::new(SequenceSource::new(0));
    let cfg = SharedWindowConfig {
        pull_size: 1000,
        cursor_mode: CursorMode::Reserved,
        ..config("reserved")
    };

    let warm = SharedWindowCache::new(store.clone(), source.clone(), cfg.clone())
        .await
        .unwrap();
    let mut seen: HashSet<u64> = warm.next(5).await.unwrap().into_iter().collect();

    // 8 consumers * 20 calls * 5 items stays inside the single 1000-item batch.
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let cache = SharedWindowCache::attach(store.clone(), source.clone(), cfg.clone());
            tokio::spawn(async move {
                let mut served = Vec::new();
                for _ in 0..20 {
                    served.extend(cache.next(5).await.unwrap());
                }
                served
            })
        })
        .collect();

    for result in futures::future::join_all(tasks).await {
        for item in result.unwrap() {
            assert!(seen.insert(item), "item {item} served twice");
        }
    }
    assert_eq!(seen.len(), 805);
    assert_eq!(store.get_int("reserved-cur").await.unwrap(), Some(805));
}

#[tokio::test]
async fn test_reserved_mode_short_read_at_tail() {
    let pulls = Arc::new(AtomicUsize::new(0));
    let cache = SharedWindowCache::new(
        InMemoryStore::new(),
        fixed_source(pulls),
        SharedWindowConfig {
            cursor_mode: CursorMode::Reserved,
            ..config("tail")
        },
    )
    .await
    .unwrap();

    cache.next(12).await.unwrap();
    assert_eq!(cache.next(5).await.unwrap(), strs(&["13"]));
    assert_eq!(cache.state().await.unwrap().cursor, 13);
}

#[tokio::test]
async fn test_snapshot_mode_lockstep_readers_overlap() {
    let (a, b, cursor) = lockstep_pair(CursorMode::Snapshot).await;

    // Both sliced from the cursor they read, so both got the same items,
    // while the cursor still moved past both increments.
    assert_eq!(a, strs(&["4", "5", "6"]));
    assert_eq!(b, strs(&["4", "5", "6"]));
    assert_eq!(cursor, 9);
}

#[tokio::test]
async fn test_reserved_mode_lockstep_readers_are_disjoint() {
    let (a, b, cursor) = lockstep_pair(CursorMode::Reserved).await;

    let mut served: Vec<String> = a.into_iter().chain(b).collect();
    served.sort_by_key(|s| s.parse::<u32>().unwrap());
    assert_eq!(served, strs(&["4", "5", "6", "7", "8", "9"]));
    assert_eq!(cursor, 9);
}

#[tokio::test]
async fn test_oversized_request_never_moves_cursor_back() {
    for mode in [CursorMode::Snapshot, CursorMode::Reserved] {
        let store = InMemoryStore::new();
        let pulls = Arc::new(AtomicUsize::new(0));
        let cache = SharedWindowCache::new(
            store.clone(),
            fixed_source(pulls.clone()),
            SharedWindowConfig {
                cursor_mode: mode,
                ..config("huge")
            },
        )
        .await
        .unwrap();

        assert_eq!(cache.next(3).await.unwrap(), strs(&["1", "2", "3"]));

        // Clamped to the ten items left in the window.
        let rest = cache.next(usize::MAX).await.unwrap();
        assert_eq!(rest, thirteen()[3..].to_vec());
        assert_eq!(store.get_int("huge-cur").await.unwrap(), Some(13));

        // Exhausted, so the next call starts a fresh batch.
        assert_eq!(cache.next(3).await.unwrap(), strs(&["1", "2", "3"]));
        assert_eq!(pulls.load(Ordering::SeqCst), 2);
    }
}
