//! # Berth Runtime
//!
//! Runtime for sharded, single-writer state machines.
//!
//! This crate provides the [`ShardCoordinator`], which routes every action to
//! the worker that owns its shard key, runs the reducer against a working copy
//! of the committed state, and publishes the result with an optimistic
//! compare-and-swap.
//!
//! ## Core Components
//!
//! - **`ShardCoordinator`**: One worker per shard key, bounded queues, retry on
//!   version conflicts, effect execution after commit
//! - **`ShardStore`**: Versioned snapshot persistence (`InMemoryShardStore`)
//! - **Retry**: Exponential backoff with jitter
//! - **Metrics**: Prometheus counters for operations, backpressure and quarantine
//!
//! ## Example
//!
//! ```
//! use berth_core::effect::Effects;
//! use berth_core::reducer::Reducer;
//! use berth_core::smallvec;
//! use berth_runtime::{CoordinatorConfig, ShardCoordinator, ShardFault};
//!
//! #[derive(Debug)]
//! struct Overflow;
//!
//! impl ShardFault for Overflow {
//!     fn is_fatal(&self) -> bool {
//!         false
//!     }
//! }
//!
//! struct Counter;
//!
//! impl Reducer for Counter {
//!     type State = u32;
//!     type Action = u32;
//!     type Environment = ();
//!     type Output = Result<u32, Overflow>;
//!
//!     fn reduce(&self, state: &mut u32, add: u32, _env: &()) -> (Self::Output, Effects<u32>) {
//!         match state.checked_add(add) {
//!             Some(value) => {
//!                 *state = value;
//!                 (Ok(value), smallvec![])
//!             },
//!             None => (Err(Overflow), smallvec![]),
//!         }
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), berth_runtime::SubmitError> {
//! let coordinator = ShardCoordinator::in_memory(Counter, (), CoordinatorConfig::default());
//! let total = coordinator.submit("left".to_string(), 5).await?;
//! assert!(matches!(total, Ok(5)));
//! # Ok(())
//! # }
//! ```

/// Retry logic with exponential backoff
pub mod retry;

/// Prometheus metrics for observability
pub mod metrics;

/// Versioned shard state persistence
pub mod store;

mod coordinator;

/// Error types for the shard runtime
pub mod error {
    use crate::store::StoreError;
    use std::time::Duration;
    use thiserror::Error;

    /// Errors returned to callers of [`ShardCoordinator`](crate::ShardCoordinator).
    ///
    /// These describe why an action never produced a reducer output. Domain
    /// rejections travel inside the reducer's output instead.
    #[derive(Error, Debug, Clone, PartialEq, Eq)]
    pub enum SubmitError {
        /// The shard cannot take more work right now.
        ///
        /// Returned when the shard queue is full, or when an operation kept
        /// losing its compare-and-swap until retries ran out. Nothing was
        /// applied.
        #[error("Shard {shard} is busy, retry after {retry_after:?}")]
        Busy {
            /// The shard that rejected the action.
            shard: String,
            /// Suggested delay before retrying.
            retry_after: Duration,
        },

        /// The shard was taken out of service after a fatal reducer error.
        #[error("Shard {0} is quarantined")]
        Quarantined(String),

        /// The coordinator is shut down and not accepting new actions.
        #[error("Coordinator is shut down")]
        Closed,

        /// The caller stopped waiting.
        ///
        /// The action may still be applied; it was already enqueued.
        #[error("Timed out waiting for shard reply")]
        Timeout,

        /// The shard store failed for a reason other than a version conflict.
        #[error(transparent)]
        Store(#[from] StoreError),
    }
}

/// Classifies reducer errors for the coordinator.
pub trait ShardFault {
    /// Whether the error means the shard's state can no longer be trusted.
    ///
    /// A fatal error quarantines the shard.
    fn is_fatal(&self) -> bool;
}

/// How the coordinator treats a reducer output.
///
/// Implemented for every `Result<T, E>` whose error is a [`ShardFault`]:
/// `Ok` outputs are committed, `Err` outputs discard the working copy.
pub trait ShardOutcome {
    /// Whether the working copy that produced this output should be committed.
    fn is_committable(&self) -> bool;

    /// Whether the output should quarantine the shard.
    fn is_fatal(&self) -> bool;
}

impl<T, E: ShardFault> ShardOutcome for Result<T, E> {
    fn is_committable(&self) -> bool {
        self.is_ok()
    }

    fn is_fatal(&self) -> bool {
        self.as_ref().err().is_some_and(ShardFault::is_fatal)
    }
}

pub use coordinator::{CoordinatorConfig, Pending, ShardCoordinator};
pub use error::SubmitError;
pub use retry::RetryPolicy;
pub use store::{InMemoryShardStore, ShardStore, Snapshot, StoreError};

#[cfg(test)]
mod tests {
    use super::*;

    struct Fault(bool);

    impl ShardFault for Fault {
        fn is_fatal(&self) -> bool {
            self.0
        }
    }

    #[test]
    fn test_result_outcome_classification() {
        let ok: Result<u8, Fault> = Ok(1);
        assert!(ok.is_committable());
        assert!(!ok.is_fatal());

        let rejected: Result<u8, Fault> = Err(Fault(false));
        assert!(!rejected.is_committable());
        assert!(!rejected.is_fatal());

        let fatal: Result<u8, Fault> = Err(Fault(true));
        assert!(!fatal.is_committable());
        assert!(fatal.is_fatal());
    }
}
