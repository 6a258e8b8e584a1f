//! Business metrics for the reservation engine.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `booking_bookings_total{status}` - Bookings created, by initial status
//! - `booking_rejections_total{reason}` - Booking requests turned down, by error kind
//! - `booking_cancellations_total{reason}` - Cancellations, by reason
//! - `booking_promotions_total{to}` - Promotions out of RAC or the waitlist
//! - `booking_refunds_minor_total` - Refunded amount in minor units
//! - `booking_charts_prepared_total` - Shards charted
//!
//! ## Histograms
//! - `booking_passengers_per_booking` - Group size of created bookings

use crate::types::{BookingStatus, CancellationReason, Money};
use metrics::{counter, describe_counter, describe_histogram, histogram};

/// Initialize and register all business metrics descriptions.
///
/// Call once at startup, before any metrics are recorded.
pub fn register_business_metrics() {
    describe_counter!(
        "booking_bookings_total",
        "Total number of bookings created, by initial status (CONFIRMED, RAC, WAITLISTED)"
    );
    describe_counter!(
        "booking_rejections_total",
        "Total number of booking requests rejected, by reason"
    );
    describe_counter!(
        "booking_cancellations_total",
        "Total number of cancellations, by reason"
    );
    describe_counter!(
        "booking_promotions_total",
        "Total number of promotions out of RAC or the waitlist, by target status"
    );
    describe_counter!(
        "booking_refunds_minor_total",
        "Total refunded amount in minor units"
    );
    describe_counter!(
        "booking_charts_prepared_total",
        "Total number of class shards charted"
    );
    describe_histogram!(
        "booking_passengers_per_booking",
        "Number of passengers on each created booking"
    );

    tracing::info!("Business metrics registered");
}

/// Record a created booking.
pub fn record_booking(status: BookingStatus, passengers: usize) {
    counter!("booking_bookings_total", "status" => status.as_str()).increment(1);
    #[allow(clippy::cast_precision_loss)]
    histogram!("booking_passengers_per_booking").record(passengers as f64);
}

/// Record a rejected booking request.
pub fn record_rejection(reason: &'static str) {
    counter!("booking_rejections_total", "reason" => reason).increment(1);
}

/// Record a cancellation and its refund.
pub fn record_cancellation(reason: CancellationReason, refund: Money) {
    let reason = match reason {
        CancellationReason::PassengerRequested => "passenger_requested",
        CancellationReason::AutoCancelledWaitlist => "auto_cancelled_waitlist",
    };
    counter!("booking_cancellations_total", "reason" => reason).increment(1);
    counter!("booking_refunds_minor_total").increment(refund.minor());
}

/// Record a promotion.
pub fn record_promotion(to: BookingStatus) {
    counter!("booking_promotions_total", "to" => to.as_str()).increment(1);
}

/// Record a charted shard and the waitlisted bookings it cancelled.
pub fn record_chart_prepared(auto_cancelled: usize, refunded: Money) {
    counter!("booking_charts_prepared_total").increment(1);
    counter!("booking_cancellations_total", "reason" => "auto_cancelled_waitlist")
        .increment(u64::try_from(auto_cancelled).unwrap_or(u64::MAX));
    counter!("booking_refunds_minor_total").increment(refunded.minor());
}
