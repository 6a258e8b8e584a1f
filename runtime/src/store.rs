//! Versioned shard state persistence with optimistic concurrency.
//!
//! A shard's committed state is an immutable [`Snapshot`]: the state behind an
//! `Arc` plus the version it was committed at. Writers never mutate a snapshot;
//! they build a new state from a clone and publish it with
//! [`ShardStore::compare_and_swap`], which only succeeds if nobody committed in
//! between. Readers therefore always observe a fully committed state.
//!
//! # Implementations
//!
//! - [`InMemoryShardStore`]: `HashMap` behind a `tokio::sync::RwLock`

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

/// Boxed future returned by [`ShardStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Errors that can occur during shard store operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Optimistic concurrency conflict: the shard moved past the expected version.
    ///
    /// This means another writer committed between our load and our swap.
    #[error("Version conflict on shard {shard}: expected version {expected}, found {actual}")]
    Conflict {
        /// The shard where the conflict occurred.
        shard: String,
        /// The version the writer loaded.
        expected: u64,
        /// The version currently committed.
        actual: u64,
    },

    /// The backing storage failed.
    #[error("Shard store backend error: {0}")]
    Backend(String),
}

impl StoreError {
    /// Whether re-running the operation against a fresh snapshot may succeed.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }
}

/// A committed shard state and the version it was committed at.
///
/// Version 0 means "never committed"; the first successful swap produces
/// version 1.
#[derive(Debug)]
pub struct Snapshot<S> {
    /// Commit counter for the shard.
    pub version: u64,
    /// The committed state.
    pub state: Arc<S>,
}

impl<S> Clone for Snapshot<S> {
    fn clone(&self) -> Self {
        Self {
            version: self.version,
            state: Arc::clone(&self.state),
        }
    }
}

/// Shard state persistence with version compare-and-swap.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the coordinator can hold an
/// `Arc<dyn ShardStore<K, S>>`.
pub trait ShardStore<K, S>: Send + Sync {
    /// Load the last committed snapshot of a shard, `None` if never committed.
    fn load<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<Snapshot<S>>>;

    /// Publish `state` as the next version of the shard.
    ///
    /// Succeeds only if the committed version is still `expected_version`
    /// (0 for a shard that was never committed). Returns the new version.
    ///
    /// # Errors
    ///
    /// - [`StoreError::Conflict`] when another writer committed first
    /// - [`StoreError::Backend`] when the storage itself failed
    fn compare_and_swap<'a>(
        &'a self,
        key: &'a K,
        expected_version: u64,
        state: S,
    ) -> StoreFuture<'a, u64>;
}

/// In-memory shard store.
///
/// Commits take the write lock only for the version check and the pointer
/// swap; loads share the read lock.
pub struct InMemoryShardStore<K, S> {
    shards: RwLock<HashMap<K, Snapshot<S>>>,
}

impl<K, S> InMemoryShardStore<K, S> {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, S> Default for InMemoryShardStore<K, S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, S> InMemoryShardStore<K, S>
where
    K: Eq + Hash,
{
    /// Number of shards that have at least one committed version.
    pub async fn len(&self) -> usize {
        self.shards.read().await.len()
    }

    /// Whether no shard has been committed yet.
    pub async fn is_empty(&self) -> bool {
        self.shards.read().await.is_empty()
    }
}

impl<K, S> ShardStore<K, S> for InMemoryShardStore<K, S>
where
    K: Clone + Eq + Hash + Display + Send + Sync,
    S: Send + Sync,
{
    fn load<'a>(&'a self, key: &'a K) -> StoreFuture<'a, Option<Snapshot<S>>> {
        Box::pin(async move { Ok(self.shards.read().await.get(key).cloned()) })
    }

    fn compare_and_swap<'a>(
        &'a self,
        key: &'a K,
        expected_version: u64,
        state: S,
    ) -> StoreFuture<'a, u64> {
        Box::pin(async move {
            let mut shards = self.shards.write().await;
            let actual = shards.get(key).map_or(0, |snapshot| snapshot.version);
            if actual != expected_version {
                return Err(StoreError::Conflict {
                    shard: key.to_string(),
                    expected: expected_version,
                    actual,
                });
            }

            let version = actual + 1;
            shards.insert(
                key.clone(),
                Snapshot {
                    version,
                    state: Arc::new(state),
                },
            );
            Ok(version)
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_load_missing_shard_returns_none() {
        let store: InMemoryShardStore<String, u32> = InMemoryShardStore::new();
        assert!(store.load(&"a".to_string()).await.unwrap().is_none());
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn test_swap_advances_version() {
        let store: InMemoryShardStore<String, u32> = InMemoryShardStore::new();
        let key = "a".to_string();

        assert_eq!(store.compare_and_swap(&key, 0, 10).await.unwrap(), 1);
        assert_eq!(store.compare_and_swap(&key, 1, 20).await.unwrap(), 2);

        let snapshot = store.load(&key).await.unwrap().unwrap();
        assert_eq!(snapshot.version, 2);
        assert_eq!(*snapshot.state, 20);
    }

    #[tokio::test]
    async fn test_stale_swap_conflicts_and_keeps_state() {
        let store: InMemoryShardStore<String, u32> = InMemoryShardStore::new();
        let key = "a".to_string();
        store.compare_and_swap(&key, 0, 10).await.unwrap();

        let err = store.compare_and_swap(&key, 0, 99).await.unwrap_err();
        assert_eq!(
            err,
            StoreError::Conflict {
                shard: "a".to_string(),
                expected: 0,
                actual: 1,
            }
        );
        assert!(err.is_conflict());

        let snapshot = store.load(&key).await.unwrap().unwrap();
        assert_eq!(*snapshot.state, 10);
    }

    #[tokio::test]
    async fn test_snapshot_survives_later_commit() {
        let store: InMemoryShardStore<String, u32> = InMemoryShardStore::new();
        let key = "a".to_string();
        store.compare_and_swap(&key, 0, 1).await.unwrap();

        let before = store.load(&key).await.unwrap().unwrap();
        store.compare_and_swap(&key, 1, 2).await.unwrap();

        assert_eq!(*before.state, 1);
        assert_eq!(before.version, 1);
    }
}
