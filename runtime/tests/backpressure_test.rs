//! Backpressure, timeout and version-conflict behaviour of the shard coordinator.

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use berth_core::effect::Effects;
use berth_core::reducer::Reducer;
use berth_core::smallvec;
use berth_runtime::store::StoreFuture;
use berth_runtime::{
    CoordinatorConfig, InMemoryShardStore, RetryPolicy, ShardCoordinator, ShardFault, ShardStore,
    Snapshot, StoreError, SubmitError,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, PartialEq, Eq)]
struct NeverFails;

impl ShardFault for NeverFails {
    fn is_fatal(&self) -> bool {
        false
    }
}

/// Blocks inside `reduce` until the test releases the gate.
struct Gate {
    entered: Arc<AtomicBool>,
    lock: Arc<Mutex<()>>,
}

impl Reducer for Gate {
    type State = u32;
    type Action = ();
    type Environment = ();
    type Output = Result<u32, NeverFails>;

    fn reduce(&self, state: &mut u32, _action: (), _env: &()) -> (Self::Output, Effects<()>) {
        self.entered.store(true, Ordering::SeqCst);
        let _held = self.lock.lock().unwrap();
        *state += 1;
        (Ok(*state), smallvec![])
    }
}

async fn wait_until(flag: &AtomicBool) {
    for _ in 0..500 {
        if flag.load(Ordering::SeqCst) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("worker never entered the reducer");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_queue_rejects_with_busy() {
    let entered = Arc::new(AtomicBool::new(false));
    let lock = Arc::new(Mutex::new(()));
    let guard = lock.lock().unwrap();

    let coordinator = ShardCoordinator::in_memory(
        Gate {
            entered: Arc::clone(&entered),
            lock: Arc::clone(&lock),
        },
        (),
        CoordinatorConfig::default()
            .with_max_queue_depth(1)
            .with_busy_retry_after(Duration::from_millis(25)),
    );
    let key = "shard".to_string();

    // First action is picked up by the worker and blocks in the reducer.
    let first = coordinator.dispatch(key.clone(), ()).unwrap();
    wait_until(&entered).await;

    // Second fills the one-slot queue, third is turned away.
    let second = coordinator.dispatch(key.clone(), ()).unwrap();
    let third = coordinator.dispatch(key.clone(), ());
    match third {
        Err(SubmitError::Busy { shard, retry_after }) => {
            assert_eq!(shard, "shard");
            assert_eq!(retry_after, Duration::from_millis(25));
        },
        other => panic!("expected Busy, got {:?}", other.map(|_| ())),
    }
    assert_eq!(coordinator.queue_depth(&key), 1);

    drop(guard);
    assert_eq!(first.wait().await.unwrap(), Ok(1));
    assert_eq!(second.wait().await.unwrap(), Ok(2));

    // Rejected action left no trace.
    let snapshot = coordinator.snapshot(&key).await.unwrap().unwrap();
    assert_eq!(*snapshot.state, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_caller_does_not_cancel_operation() {
    let entered = Arc::new(AtomicBool::new(false));
    let lock = Arc::new(Mutex::new(()));
    let guard = lock.lock().unwrap();

    let coordinator = ShardCoordinator::in_memory(
        Gate {
            entered: Arc::clone(&entered),
            lock: Arc::clone(&lock),
        },
        (),
        CoordinatorConfig::default(),
    );
    let key = "shard".to_string();

    let result = coordinator
        .submit_timeout(key.clone(), (), Duration::from_millis(20))
        .await;
    assert_eq!(result, Err(SubmitError::Timeout));
    wait_until(&entered).await;

    drop(guard);
    for _ in 0..500 {
        if coordinator.snapshot(&key).await.unwrap().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let snapshot = coordinator.snapshot(&key).await.unwrap().unwrap();
    assert_eq!(*snapshot.state, 1);
}

/// Store whose first `conflicts` swaps report a concurrent writer.
struct ContendedStore {
    inner: InMemoryShardStore<String, u32>,
    conflicts: AtomicUsize,
    swaps: AtomicUsize,
}

impl ContendedStore {
    fn new(conflicts: usize) -> Self {
        Self {
            inner: InMemoryShardStore::new(),
            conflicts: AtomicUsize::new(conflicts),
            swaps: AtomicUsize::new(0),
        }
    }
}

impl ShardStore<String, u32> for ContendedStore {
    fn load<'a>(&'a self, key: &'a String) -> StoreFuture<'a, Option<Snapshot<u32>>> {
        self.inner.load(key)
    }

    fn compare_and_swap<'a>(
        &'a self,
        key: &'a String,
        expected_version: u64,
        state: u32,
    ) -> StoreFuture<'a, u64> {
        self.swaps.fetch_add(1, Ordering::SeqCst);
        let remaining = self.conflicts.load(Ordering::SeqCst);
        if remaining > 0 {
            self.conflicts.store(remaining - 1, Ordering::SeqCst);
            return Box::pin(async move {
                Err(StoreError::Conflict {
                    shard: key.clone(),
                    expected: expected_version,
                    actual: expected_version + 1,
                })
            });
        }
        self.inner.compare_and_swap(key, expected_version, state)
    }
}

struct Increment;

impl Reducer for Increment {
    type State = u32;
    type Action = ();
    type Environment = ();
    type Output = Result<u32, NeverFails>;

    fn reduce(&self, state: &mut u32, _action: (), _env: &()) -> (Self::Output, Effects<()>) {
        *state += 1;
        (Ok(*state), smallvec![])
    }
}

fn fast_retries(max_retries: usize) -> RetryPolicy {
    RetryPolicy::builder()
        .max_retries(max_retries)
        .initial_delay(Duration::from_millis(1))
        .max_delay(Duration::from_millis(2))
        .build()
}

#[tokio::test]
async fn stale_version_is_retried_from_fresh_snapshot() {
    let store = Arc::new(ContendedStore::new(2));
    let coordinator = ShardCoordinator::new(
        Increment,
        (),
        Arc::clone(&store) as Arc<dyn ShardStore<String, u32>>,
        CoordinatorConfig::default().with_retry_policy(fast_retries(3)),
    );

    let out = coordinator.submit("k".to_string(), ()).await.unwrap();
    assert_eq!(out, Ok(1));
    assert_eq!(store.swaps.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn persistent_conflicts_surface_busy() {
    let store = Arc::new(ContendedStore::new(usize::MAX));
    let coordinator = ShardCoordinator::new(
        Increment,
        (),
        Arc::clone(&store) as Arc<dyn ShardStore<String, u32>>,
        CoordinatorConfig::default().with_retry_policy(fast_retries(2)),
    );

    let result = coordinator.submit("k".to_string(), ()).await;
    assert!(matches!(result, Err(SubmitError::Busy { .. })));
    assert_eq!(store.swaps.load(Ordering::SeqCst), 3);
    assert!(coordinator.snapshot(&"k".to_string()).await.unwrap().is_none());
}

async fn wait_for_shard_count(coordinator: &ShardCoordinator<String, Increment>, expected: usize) {
    for _ in 0..500 {
        if coordinator.shard_count() == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!(
        "shard count stayed at {}, expected {expected}",
        coordinator.shard_count()
    );
}

#[tokio::test]
async fn idle_workers_retire_and_respawn_on_demand() {
    let coordinator = ShardCoordinator::in_memory(
        Increment,
        (),
        CoordinatorConfig::default().with_idle_timeout(Some(Duration::from_millis(20))),
    );

    coordinator.submit("a".to_string(), ()).await.unwrap().unwrap();
    coordinator.submit("b".to_string(), ()).await.unwrap().unwrap();
    assert_eq!(coordinator.shard_count(), 2);

    wait_for_shard_count(&coordinator, 0).await;
    assert_eq!(coordinator.queue_depth(&"a".to_string()), 0);

    // A fresh worker picks up from the committed snapshot.
    let out = coordinator.submit("a".to_string(), ()).await.unwrap();
    assert_eq!(out, Ok(2));
    assert_eq!(coordinator.shard_count(), 1);
}

#[tokio::test]
async fn disabled_idle_timeout_keeps_workers() {
    let coordinator = ShardCoordinator::in_memory(
        Increment,
        (),
        CoordinatorConfig::default().with_idle_timeout(None),
    );

    coordinator.submit("a".to_string(), ()).await.unwrap().unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(coordinator.shard_count(), 1);
}
