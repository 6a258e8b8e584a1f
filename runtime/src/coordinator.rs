//! The shard coordinator: one single-writer worker per shard key.

use crate::error::SubmitError;
use crate::metrics::{EffectMetrics, ShardMetrics};
use crate::retry::{RetryPolicy, retry_with_predicate};
use crate::store::{InMemoryShardStore, ShardStore, Snapshot, StoreError};
use crate::ShardOutcome;
use berth_core::SmallVec;
use berth_core::effect::{Effect, Effects};
use berth_core::reducer::Reducer;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt::Display;
use std::future::Future;
use std::hash::Hash;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

/// Coordinator tuning.
///
/// # Default Values
///
/// - `max_queue_depth`: 256 pending actions per shard
/// - `retry_policy`: [`RetryPolicy::default`]
/// - `busy_retry_after`: 50ms
/// - `idle_timeout`: 5 minutes
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Bound of each shard's queue; a full queue rejects with `Busy`.
    pub max_queue_depth: usize,
    /// Backoff for operations whose compare-and-swap lost a race.
    pub retry_policy: RetryPolicy,
    /// Hint returned with `Busy`.
    pub busy_retry_after: Duration,
    /// How long a worker waits for work before it retires; `None` keeps
    /// workers for the life of the coordinator.
    ///
    /// A retired shard gets a fresh worker on its next action. Quarantined
    /// shards never retire.
    pub idle_timeout: Option<Duration>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 256,
            retry_policy: RetryPolicy::default(),
            busy_retry_after: Duration::from_millis(50),
            idle_timeout: Some(Duration::from_secs(300)),
        }
    }
}

impl CoordinatorConfig {
    /// Set the per-shard queue bound (at least 1).
    #[must_use]
    pub fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth.max(1);
        self
    }

    /// Set the conflict retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Set the `Busy` retry hint.
    #[must_use]
    pub const fn with_busy_retry_after(mut self, retry_after: Duration) -> Self {
        self.busy_retry_after = retry_after;
        self
    }

    /// Set (or disable with `None`) the idle worker timeout.
    #[must_use]
    pub const fn with_idle_timeout(mut self, idle_timeout: Option<Duration>) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
}

type Reply<O> = oneshot::Sender<Result<O, SubmitError>>;

struct Envelope<A, O> {
    action: A,
    /// `None` for feedback actions produced by effects.
    reply: Option<Reply<O>>,
}

struct ShardHandle<A, O> {
    sender: mpsc::Sender<Envelope<A, O>>,
    quarantined: Arc<AtomicBool>,
    /// Tells a retiring worker whether the map entry is still its own.
    worker: u64,
}

/// Route from a worker's effects back into its queue.
struct Feedback<A, O> {
    sender: mpsc::WeakSender<Envelope<A, O>>,
    /// Effects spawned by the worker that have not finished yet.
    in_flight: Arc<AtomicUsize>,
}

/// What an idle worker found when it tried to retire.
enum Idle<E> {
    Retired,
    Stay,
    Work(E),
}

struct Inner<K, R: Reducer> {
    reducer: R,
    environment: R::Environment,
    store: Arc<dyn ShardStore<K, R::State>>,
    config: CoordinatorConfig,
    shards: Mutex<HashMap<K, ShardHandle<R::Action, R::Output>>>,
    next_worker: AtomicU64,
    closed: AtomicBool,
}

/// A reply that has been enqueued but not yet received.
///
/// Dropping a `Pending` does not cancel the operation; the worker applies it
/// and discards the reply.
pub struct Pending<O> {
    receiver: oneshot::Receiver<Result<O, SubmitError>>,
}

impl<O> Pending<O> {
    /// Wait for the shard worker's reply.
    ///
    /// # Errors
    ///
    /// Whatever the worker reported, or [`SubmitError::Closed`] if the worker
    /// went away without replying.
    pub async fn wait(self) -> Result<O, SubmitError> {
        self.receiver.await.map_err(|_| SubmitError::Closed)?
    }

    /// Wait for the reply for at most `timeout`.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Timeout`] when the deadline passes first; otherwise as
    /// [`wait`](Self::wait).
    pub async fn wait_timeout(self, timeout: Duration) -> Result<O, SubmitError> {
        match tokio::time::timeout(timeout, self.receiver).await {
            Ok(reply) => reply.map_err(|_| SubmitError::Closed)?,
            Err(_) => Err(SubmitError::Timeout),
        }
    }
}

/// Routes actions to per-shard single-writer workers.
///
/// Each shard key gets its own worker task, spawned on first use, draining a
/// bounded queue in order. A worker left idle for the configured
/// `idle_timeout` retires and is respawned on demand. At most one operation
/// per shard is in flight;
/// different shards proceed in parallel. The only shared lock is the short
/// map lookup that finds (or spawns) a worker.
///
/// Every operation loads the shard's last committed [`Snapshot`], reduces a
/// clone of it, and commits the clone with a version compare-and-swap. A lost
/// swap re-runs the operation from a fresh snapshot under the configured
/// [`RetryPolicy`]. Effects run only after the commit.
pub struct ShardCoordinator<K, R: Reducer> {
    inner: Arc<Inner<K, R>>,
}

impl<K, R: Reducer> Clone for ShardCoordinator<K, R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<K, R> ShardCoordinator<K, R>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Reducer + Send + Sync + 'static,
    R::State: Clone + Default + Send + Sync + 'static,
    R::Action: Clone + Send + Sync + 'static,
    R::Environment: Send + Sync + 'static,
    R::Output: ShardOutcome + Send + 'static,
{
    /// Create a coordinator over the given store.
    pub fn new(
        reducer: R,
        environment: R::Environment,
        store: Arc<dyn ShardStore<K, R::State>>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                reducer,
                environment,
                store,
                config,
                shards: Mutex::new(HashMap::new()),
                next_worker: AtomicU64::new(0),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Create a coordinator backed by an [`InMemoryShardStore`].
    pub fn in_memory(reducer: R, environment: R::Environment, config: CoordinatorConfig) -> Self {
        Self::new(
            reducer,
            environment,
            Arc::new(InMemoryShardStore::new()),
            config,
        )
    }

    /// The environment handed to the reducer.
    pub fn environment(&self) -> &R::Environment {
        &self.inner.environment
    }

    /// Enqueue an action on its shard without waiting for the result.
    ///
    /// Must be called from within a Tokio runtime: the shard worker is
    /// spawned on first use.
    ///
    /// # Errors
    ///
    /// - [`SubmitError::Busy`] when the shard queue is full
    /// - [`SubmitError::Quarantined`] when the shard is out of service
    /// - [`SubmitError::Closed`] after [`shutdown`](Self::shutdown)
    pub fn dispatch(&self, key: K, action: R::Action) -> Result<Pending<R::Output>, SubmitError> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(SubmitError::Closed);
        }

        let (reply, receiver) = oneshot::channel();
        let envelope = Envelope {
            action,
            reply: Some(reply),
        };

        let mut shards = self
            .inner
            .shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let handle = match shards.entry(key.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let handle = self.spawn_worker(entry.key().clone());
                entry.insert(handle)
            },
        };

        if handle.quarantined.load(Ordering::Acquire) {
            return Err(SubmitError::Quarantined(key.to_string()));
        }

        match handle.sender.try_send(envelope) {
            Ok(()) => {
                ShardMetrics::record_workers(shards.len());
                Ok(Pending { receiver })
            },
            Err(mpsc::error::TrySendError::Full(_)) => {
                ShardMetrics::record_busy();
                tracing::debug!(shard = %key, "Shard queue full, rejecting action");
                Err(SubmitError::Busy {
                    shard: key.to_string(),
                    retry_after: self.inner.config.busy_retry_after,
                })
            },
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SubmitError::Closed),
        }
    }

    /// Submit an action and wait for the reducer's output.
    ///
    /// # Errors
    ///
    /// See [`dispatch`](Self::dispatch) and [`Pending::wait`].
    pub async fn submit(&self, key: K, action: R::Action) -> Result<R::Output, SubmitError> {
        self.dispatch(key, action)?.wait().await
    }

    /// Submit an action and wait at most `timeout` for the output.
    ///
    /// A timed-out action has still been enqueued and will be applied.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Timeout`] when the deadline passes; otherwise as
    /// [`submit`](Self::submit).
    pub async fn submit_timeout(
        &self,
        key: K,
        action: R::Action,
        timeout: Duration,
    ) -> Result<R::Output, SubmitError> {
        self.dispatch(key, action)?.wait_timeout(timeout).await
    }

    /// The last committed snapshot of a shard, `None` if never committed.
    ///
    /// Reads never wait for the shard worker.
    ///
    /// # Errors
    ///
    /// [`SubmitError::Store`] if the store cannot be read.
    pub async fn snapshot(&self, key: &K) -> Result<Option<Snapshot<R::State>>, SubmitError> {
        Ok(self.inner.store.load(key).await?)
    }

    /// Whether a shard has been quarantined.
    pub fn is_quarantined(&self, key: &K) -> bool {
        self.inner
            .shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .is_some_and(|handle| handle.quarantined.load(Ordering::Acquire))
    }

    /// Number of actions waiting in a shard's queue.
    pub fn queue_depth(&self, key: &K) -> usize {
        self.inner
            .shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(key)
            .map_or(0, |handle| {
                handle.sender.max_capacity() - handle.sender.capacity()
            })
    }

    /// Number of shards with a live worker.
    ///
    /// Drops as idle workers retire.
    pub fn shard_count(&self) -> usize {
        self.inner
            .shards
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Stop accepting actions.
    ///
    /// Workers finish the actions already queued and then exit.
    pub fn shutdown(&self) {
        self.inner.closed.store(true, Ordering::Release);
        let drained = std::mem::take(
            &mut *self
                .inner
                .shards
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        ShardMetrics::record_workers(0);
        tracing::info!(shards = drained.len(), "Shard coordinator shut down");
    }

    fn spawn_worker(&self, key: K) -> ShardHandle<R::Action, R::Output> {
        let (sender, receiver) = mpsc::channel(self.inner.config.max_queue_depth.max(1));
        let quarantined = Arc::new(AtomicBool::new(false));
        let worker = self.inner.next_worker.fetch_add(1, Ordering::Relaxed);
        let feedback = Feedback {
            sender: sender.downgrade(),
            in_flight: Arc::new(AtomicUsize::new(0)),
        };

        tracing::debug!(shard = %key, worker, "Spawning shard worker");
        tokio::spawn(run_worker(
            Arc::downgrade(&self.inner),
            key,
            worker,
            receiver,
            feedback,
            Arc::clone(&quarantined),
        ));

        ShardHandle {
            sender,
            quarantined,
            worker,
        }
    }
}

/// Worker loop for one shard.
///
/// Holds only a weak reference to the coordinator so dropping every
/// coordinator handle closes the queues and ends the worker.
async fn run_worker<K, R>(
    inner: Weak<Inner<K, R>>,
    key: K,
    worker: u64,
    mut receiver: mpsc::Receiver<Envelope<R::Action, R::Output>>,
    feedback: Feedback<R::Action, R::Output>,
    quarantined: Arc<AtomicBool>,
) where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Reducer + Send + Sync + 'static,
    R::State: Clone + Default + Send + Sync + 'static,
    R::Action: Clone + Send + Sync + 'static,
    R::Environment: Send + Sync + 'static,
    R::Output: ShardOutcome + Send + 'static,
{
    let idle_timeout = inner
        .upgrade()
        .and_then(|inner| inner.config.idle_timeout);

    loop {
        let next = match idle_timeout {
            None => receiver.recv().await,
            Some(idle) => match tokio::time::timeout(idle, receiver.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    let Some(inner) = inner.upgrade() else {
                        break;
                    };
                    match inner.retire(&key, worker, &mut receiver, &feedback, &quarantined) {
                        Idle::Retired => break,
                        Idle::Stay => continue,
                        Idle::Work(envelope) => Some(envelope),
                    }
                },
            },
        };
        let Some(envelope) = next else {
            break;
        };
        let Some(inner) = inner.upgrade() else {
            break;
        };

        let reply = if quarantined.load(Ordering::Acquire) {
            Err(SubmitError::Quarantined(key.to_string()))
        } else {
            inner
                .process(&key, envelope.action, &feedback, &quarantined)
                .await
        };

        if let Some(sender) = envelope.reply {
            if sender.send(reply).is_err() {
                tracing::debug!(shard = %key, "Caller stopped waiting, reply discarded");
            }
        }
    }

    tracing::debug!(shard = %key, "Shard worker stopped");
}

impl<K, R> Inner<K, R>
where
    K: Clone + Eq + Hash + Display + Send + Sync + 'static,
    R: Reducer + Send + Sync + 'static,
    R::State: Clone + Default + Send + Sync + 'static,
    R::Action: Clone + Send + Sync + 'static,
    R::Environment: Send + Sync + 'static,
    R::Output: ShardOutcome + Send + 'static,
{
    /// Drop an idle worker's map entry so the next action respawns it.
    ///
    /// Runs under the map lock, which every dispatch also holds while it
    /// enqueues, so nothing can slip into the queue between the emptiness
    /// check and the removal. Workers with a quarantined shard or effects
    /// still running stay put.
    fn retire(
        &self,
        key: &K,
        worker: u64,
        receiver: &mut mpsc::Receiver<Envelope<R::Action, R::Output>>,
        feedback: &Feedback<R::Action, R::Output>,
        quarantined: &AtomicBool,
    ) -> Idle<Envelope<R::Action, R::Output>> {
        let mut shards = self.shards.lock().unwrap_or_else(PoisonError::into_inner);
        if quarantined.load(Ordering::Acquire) || feedback.in_flight.load(Ordering::Acquire) > 0 {
            return Idle::Stay;
        }
        if let Ok(envelope) = receiver.try_recv() {
            return Idle::Work(envelope);
        }

        if shards.get(key).is_some_and(|handle| handle.worker == worker) {
            shards.remove(key);
            ShardMetrics::record_workers(shards.len());
        }
        tracing::debug!(shard = %key, worker, "Idle shard worker retired");
        Idle::Retired
    }

    async fn process(
        &self,
        key: &K,
        action: R::Action,
        feedback: &Feedback<R::Action, R::Output>,
        quarantined: &AtomicBool,
    ) -> Result<R::Output, SubmitError> {
        let started = Instant::now();
        let applied = retry_with_predicate(
            self.config.retry_policy.clone(),
            || self.apply(key, action.clone()),
            |err: &StoreError| {
                if err.is_conflict() {
                    ShardMetrics::record_conflict();
                }
                err.is_conflict()
            },
        )
        .await;

        match applied {
            Ok((output, effects)) => {
                if output.is_fatal() {
                    quarantined.store(true, Ordering::Release);
                    ShardMetrics::record_quarantine();
                    ShardMetrics::record_operation("fatal", started.elapsed());
                    tracing::error!(shard = %key, "Fatal reducer error, shard quarantined");
                } else if output.is_committable() {
                    ShardMetrics::record_operation("committed", started.elapsed());
                    for effect in effects {
                        execute_effect(effect, feedback);
                    }
                } else {
                    ShardMetrics::record_operation("rejected", started.elapsed());
                }
                Ok(output)
            },
            Err(err) if err.is_conflict() => {
                ShardMetrics::record_retries_exhausted();
                tracing::warn!(shard = %key, error = %err, "Version conflicts persisted, giving up");
                Err(SubmitError::Busy {
                    shard: key.to_string(),
                    retry_after: self.config.busy_retry_after,
                })
            },
            Err(err) => {
                tracing::error!(shard = %key, error = %err, "Shard store failed");
                Err(SubmitError::Store(err))
            },
        }
    }

    /// One attempt: load, reduce a working copy, commit if accepted.
    async fn apply(
        &self,
        key: &K,
        action: R::Action,
    ) -> Result<(R::Output, Effects<R::Action>), StoreError> {
        let (expected_version, mut working) = match self.store.load(key).await? {
            Some(snapshot) => (snapshot.version, R::State::clone(&snapshot.state)),
            None => (0, R::State::default()),
        };

        let (output, effects) = self.reducer.reduce(&mut working, action, &self.environment);
        if !output.is_committable() {
            return Ok((output, SmallVec::new()));
        }

        let version = self
            .store
            .compare_and_swap(key, expected_version, working)
            .await?;
        tracing::trace!(shard = %key, version, "Shard state committed");
        Ok((output, effects))
    }
}

fn execute_effect<A, O>(effect: Effect<A>, feedback: &Feedback<A, O>)
where
    A: Send + 'static,
    O: Send + 'static,
{
    if effect.is_none() {
        return;
    }
    let sender = feedback.sender.clone();
    let in_flight = Arc::clone(&feedback.in_flight);
    in_flight.fetch_add(1, Ordering::AcqRel);
    tokio::spawn(async move {
        drive(effect, sender).await;
        in_flight.fetch_sub(1, Ordering::AcqRel);
    });
}

/// Run an effect to completion, feeding produced actions back to the shard.
fn drive<A, O>(
    effect: Effect<A>,
    feedback: mpsc::WeakSender<Envelope<A, O>>,
) -> Pin<Box<dyn Future<Output = ()> + Send>>
where
    A: Send + 'static,
    O: Send + 'static,
{
    Box::pin(async move {
        match effect {
            Effect::None => {},
            Effect::Future(fut) => {
                EffectMetrics::record_execution("future");
                if let Some(action) = fut.await {
                    feed_back(&feedback, action);
                }
            },
            Effect::Parallel(effects) => {
                EffectMetrics::record_execution("parallel");
                futures::future::join_all(
                    effects
                        .into_iter()
                        .map(|effect| drive(effect, feedback.clone())),
                )
                .await;
            },
            Effect::Sequential(effects) => {
                EffectMetrics::record_execution("sequential");
                for effect in effects {
                    drive(effect, feedback.clone()).await;
                }
            },
        }
    })
}

fn feed_back<A, O>(feedback: &mpsc::WeakSender<Envelope<A, O>>, action: A) {
    let Some(sender) = feedback.upgrade() else {
        EffectMetrics::record_feedback_dropped();
        tracing::debug!("Shard closed, feedback action dropped");
        return;
    };

    if let Err(err) = sender.try_send(Envelope {
        action,
        reply: None,
    }) {
        EffectMetrics::record_feedback_dropped();
        tracing::warn!(error = %err, "Feedback action dropped");
    }
}
