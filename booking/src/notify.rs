//! Outbound booking notifications.
//!
//! The reducer describes notifications as effects; the runtime runs them
//! after the shard commit. Delivery is best effort: a failed notification is
//! logged and never affects the booking.

use crate::types::{Booking, BookingStatus};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;

/// Something a passenger should hear about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingNotice {
    /// A booking was made
    Created(Booking),
    /// A cancellation elsewhere moved this booking up
    Promoted {
        /// The booking after promotion
        booking: Booking,
        /// Status before promotion
        from: BookingStatus,
    },
    /// A booking was cancelled, by the passenger or by chart preparation
    Cancelled(Booking),
}

impl BookingNotice {
    /// The booking the notice is about
    #[must_use]
    pub const fn booking(&self) -> &Booking {
        match self {
            Self::Created(booking) | Self::Cancelled(booking) => booking,
            Self::Promoted { booking, .. } => booking,
        }
    }

    /// Short label for logs
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Created(_) => "created",
            Self::Promoted { .. } => "promoted",
            Self::Cancelled(_) => "cancelled",
        }
    }
}

/// Delivery failure.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// Future returned by [`BookingNotifier::notify`].
pub type NotifyFuture<'a> = Pin<Box<dyn Future<Output = Result<(), NotifyError>> + Send + 'a>>;

/// Delivers booking notices (e-mail, SMS, push; whatever the host wires in).
pub trait BookingNotifier: Send + Sync {
    /// Deliver one notice.
    fn notify(&self, notice: BookingNotice) -> NotifyFuture<'_>;
}

/// Notifier that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl BookingNotifier for TracingNotifier {
    fn notify(&self, notice: BookingNotice) -> NotifyFuture<'_> {
        Box::pin(async move {
            let booking = notice.booking();
            tracing::info!(
                kind = notice.kind(),
                pnr = %booking.pnr,
                status = %booking.status,
                train = %booking.train_id,
                date = %booking.travel_date,
                "Booking notification"
            );
            Ok(())
        })
    }
}

/// Notifier that keeps every notice in memory.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<BookingNotice>>,
}

impl RecordingNotifier {
    /// Empty recorder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Notices delivered so far, in delivery order
    #[must_use]
    pub fn notices(&self) -> Vec<BookingNotice> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl BookingNotifier for RecordingNotifier {
    fn notify(&self, notice: BookingNotice) -> NotifyFuture<'_> {
        self.notices
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(notice);
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fare::{FarePolicy, quote};
    use crate::types::{
        BookingId, ClassType, Gender, Money, Passenger, Pnr, Quota, ShardKey, StationCode, TrainId,
    };
    use chrono::{DateTime, NaiveDate, Utc};

    fn booking(status: BookingStatus) -> Booking {
        let now = DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let passengers = vec![Passenger::new("Asha", 30, Gender::Female)];
        let key = ShardKey::new(
            TrainId::new("12951"),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            ClassType::Sleeper,
        );
        Booking {
            id: BookingId::new(),
            pnr: Pnr::from_number(1_234_567_890),
            user_id: None,
            train_id: key.train_id,
            source: StationCode::new("MMCT"),
            destination: StationCode::new("NDLS"),
            travel_date: key.travel_date,
            class: key.class,
            requested_quota: Quota::General,
            allocated_quota: Quota::General,
            status,
            fare: quote(892, Money::new(1, 0), &passengers, &FarePolicy::default()),
            passengers,
            seat_allocations: Vec::new(),
            cancellation: None,
            departure_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn test_recording_notifier_keeps_delivery_order() {
        let notifier = RecordingNotifier::new();
        let created = BookingNotice::Created(booking(BookingStatus::Waitlisted));
        let promoted = BookingNotice::Promoted {
            booking: booking(BookingStatus::Rac),
            from: BookingStatus::Waitlisted,
        };

        notifier.notify(created.clone()).await.unwrap();
        notifier.notify(promoted.clone()).await.unwrap();

        assert_eq!(notifier.notices(), vec![created, promoted]);
    }

    #[tokio::test]
    async fn test_tracing_notifier_always_succeeds() {
        let notice = BookingNotice::Cancelled(booking(BookingStatus::Cancelled));
        assert_eq!(notice.kind(), "cancelled");
        assert!(TracingNotifier.notify(notice).await.is_ok());
    }

    #[test]
    fn test_notice_serializes_with_type_tag() {
        let notice = BookingNotice::Promoted {
            booking: booking(BookingStatus::Confirmed),
            from: BookingStatus::Rac,
        };
        let json = serde_json::to_value(&notice).unwrap();
        assert_eq!(json["type"], "promoted");
        assert_eq!(json["booking"]["pnr"], "1234567890");
    }
}
