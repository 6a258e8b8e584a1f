//! Error taxonomy for reservation operations.

use crate::types::{BookingStatus, ClassType, Pnr, Quota, StationCode, TrainId};
use berth_runtime::{ShardFault, StoreError, SubmitError};
use std::time::Duration;
use thiserror::Error;

/// Errors returned by booking operations.
///
/// `CapacityExceeded` and `QuotaExhausted` are expected outcomes of a full
/// train, not faults; see [`is_expected_rejection`](Self::is_expected_rejection).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BookingError {
    /// Malformed or inadmissible request
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The destination does not follow the boarding station on the route
    #[error("Invalid route on train {train_id}: {from} -> {to}")]
    InvalidRoute {
        /// Train
        train_id: TrainId,
        /// Boarding station
        from: StationCode,
        /// Alighting station
        to: StationCode,
    },

    /// Confirmed, RAC and waitlist are all full for the requested quota chain
    #[error("No capacity left in {class} for quota {quota} ({requested} seats requested)")]
    CapacityExceeded {
        /// Class
        class: ClassType,
        /// Quota requested
        quota: Quota,
        /// Seats asked for
        requested: u32,
    },

    /// No record in the quota chain has any capacity at all
    #[error("Quota {quota} has no allocation in {class}")]
    QuotaExhausted {
        /// Class
        class: ClassType,
        /// Quota requested
        quota: Quota,
    },

    /// The booking's status does not allow the operation
    #[error("Cannot {operation} booking {pnr} in status {status}")]
    InvalidTransition {
        /// Booking
        pnr: Pnr,
        /// Status at the time of the request
        status: BookingStatus,
        /// Attempted operation
        operation: &'static str,
    },

    /// The shard is saturated; nothing was applied
    #[error("Service busy, retry after {retry_after:?}")]
    ServiceBusy {
        /// Suggested delay before retrying
        retry_after: Duration,
    },

    /// No booking carries this PNR
    #[error("Booking not found: {0}")]
    NotFound(Pnr),

    /// Could not draw an unused PNR within the attempt budget
    #[error("Could not generate a unique PNR")]
    PnrExhausted,

    /// Shard state failed a consistency check; the shard is quarantined
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    /// The reservation service cannot reach shard state
    #[error("Service unavailable: {0}")]
    Unavailable(String),
}

impl BookingError {
    /// Whether this is a normal negative answer (the train is full) rather
    /// than a fault.
    #[must_use]
    pub const fn is_expected_rejection(&self) -> bool {
        matches!(
            self,
            Self::CapacityExceeded { .. } | Self::QuotaExhausted { .. }
        )
    }

    /// Short label for logs and metrics
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::InvalidRoute { .. } => "invalid_route",
            Self::CapacityExceeded { .. } => "capacity_exceeded",
            Self::QuotaExhausted { .. } => "quota_exhausted",
            Self::InvalidTransition { .. } => "invalid_transition",
            Self::ServiceBusy { .. } => "service_busy",
            Self::NotFound(_) => "not_found",
            Self::PnrExhausted => "pnr_exhausted",
            Self::InvariantViolation(_) => "invariant_violation",
            Self::Unavailable(_) => "unavailable",
        }
    }
}

impl ShardFault for BookingError {
    fn is_fatal(&self) -> bool {
        matches!(self, Self::InvariantViolation(_))
    }
}

impl From<SubmitError> for BookingError {
    fn from(error: SubmitError) -> Self {
        match error {
            SubmitError::Busy { retry_after, .. } => Self::ServiceBusy { retry_after },
            SubmitError::Quarantined(shard) => {
                Self::Unavailable(format!("shard {shard} is quarantined"))
            },
            SubmitError::Closed => Self::Unavailable("reservation service is shut down".into()),
            SubmitError::Timeout => Self::Unavailable("timed out waiting for shard".into()),
            SubmitError::Store(store) => store.into(),
        }
    }
}

impl From<StoreError> for BookingError {
    fn from(error: StoreError) -> Self {
        Self::Unavailable(error.to_string())
    }
}
