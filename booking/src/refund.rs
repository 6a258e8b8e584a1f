//! Cancellation charges and refunds.
//!
//! The charge depends on the booking's status and on how long before the
//! train leaves the boarding station the cancellation lands:
//!
//! | Status      | Time to departure | Charge                                   |
//! |-------------|-------------------|------------------------------------------|
//! | Confirmed   | ≥ 48h             | flat charge per fare-paying passenger     |
//! | Confirmed   | 4h – 48h          | `max(25% of line, flat)` per passenger    |
//! | Confirmed   | < 4h              | total fare                                |
//! | RAC / WL    | any               | flat charge per fare-paying passenger     |
//!
//! The charge never exceeds the total, so the refund is always in
//! `[0, total]` and never grows as departure approaches.

use crate::types::{BookingStatus, FareBreakdown, Money};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Refund policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundPolicy {
    /// Flat charge per fare-paying passenger
    pub flat_charge: Money,
    /// Share of a line retained inside the middle window
    pub mid_window_percent: u32,
    /// At or beyond this many hours only the flat charge applies
    pub flat_window_hours: i64,
    /// Inside this many hours nothing is refunded
    pub cutoff_hours: i64,
}

impl Default for RefundPolicy {
    fn default() -> Self {
        Self {
            flat_charge: Money::new(60, 0),
            mid_window_percent: 25,
            flat_window_hours: 48,
            cutoff_hours: 4,
        }
    }
}

/// How a cancelled fare splits between operator and passenger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settlement {
    /// Retained
    pub charge: Money,
    /// Returned
    pub refund: Money,
}

impl Settlement {
    fn from_charge(total: Money, charge: Money) -> Self {
        let charge = charge.min(total);
        Self {
            charge,
            refund: total.saturating_sub(charge),
        }
    }

    /// Everything back, used for chart auto-cancellation.
    #[must_use]
    pub const fn full_refund(total: Money) -> Self {
        Self {
            charge: Money::ZERO,
            refund: total,
        }
    }

    /// Nothing back.
    #[must_use]
    pub const fn forfeit(total: Money) -> Self {
        Self {
            charge: total,
            refund: Money::ZERO,
        }
    }
}

/// Settle a passenger-requested cancellation.
///
/// `status` is the booking's status at the time of the request; a
/// `ChartPrepared` booking forfeits the whole fare.
#[must_use]
pub fn settle(
    status: BookingStatus,
    fare: &FareBreakdown,
    departure_at: DateTime<Utc>,
    now: DateTime<Utc>,
    policy: &RefundPolicy,
) -> Settlement {
    let paying = fare.lines.iter().filter(|line| !line.amount.is_zero());
    let flat_total = || {
        let count = u64::try_from(paying.clone().count()).unwrap_or(u64::MAX);
        policy.flat_charge.saturating_mul(count)
    };

    let charge = match status {
        BookingStatus::Rac | BookingStatus::Waitlisted => flat_total(),
        BookingStatus::Confirmed => {
            let remaining = departure_at - now;
            if remaining >= Duration::hours(policy.flat_window_hours) {
                flat_total()
            } else if remaining >= Duration::hours(policy.cutoff_hours) {
                paying
                    .clone()
                    .map(|line| line.amount.percent(policy.mid_window_percent).max(policy.flat_charge))
                    .sum()
            } else {
                fare.total
            }
        },
        BookingStatus::ChartPrepared | BookingStatus::Cancelled => fare.total,
    };

    Settlement::from_charge(fare.total, charge)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::fare::{FarePolicy, quote};
    use crate::types::{Gender, Passenger};

    fn departure() -> DateTime<Utc> {
        DateTime::parse_from_rfc3339("2025-03-10T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc)
    }

    fn two_adults() -> FareBreakdown {
        // 1000.00 per line, 2020.00 total
        quote(
            500,
            Money::new(2, 0),
            &[
                Passenger::new("A", 30, Gender::Male),
                Passenger::new("B", 31, Gender::Female),
            ],
            &FarePolicy::default(),
        )
    }

    #[test]
    fn test_confirmed_far_from_departure_pays_flat_per_passenger() {
        let fare = two_adults();
        let settlement = settle(
            BookingStatus::Confirmed,
            &fare,
            departure(),
            departure() - Duration::hours(72),
            &RefundPolicy::default(),
        );
        assert_eq!(settlement.charge, Money::new(120, 0));
        assert_eq!(settlement.refund, Money::new(1900, 0));
    }

    #[test]
    fn test_confirmed_inside_two_days_pays_quarter_of_each_line() {
        let fare = two_adults();
        let settlement = settle(
            BookingStatus::Confirmed,
            &fare,
            departure(),
            departure() - Duration::hours(10),
            &RefundPolicy::default(),
        );
        assert_eq!(settlement.charge, Money::new(500, 0));
        assert_eq!(settlement.refund, Money::new(1520, 0));
    }

    #[test]
    fn test_confirmed_inside_cutoff_forfeits_everything() {
        let fare = two_adults();
        let settlement = settle(
            BookingStatus::Confirmed,
            &fare,
            departure(),
            departure() - Duration::hours(3),
            &RefundPolicy::default(),
        );
        assert_eq!(settlement, Settlement::forfeit(fare.total));
    }

    #[test]
    fn test_waitlisted_pays_flat_regardless_of_timing() {
        let fare = two_adults();
        let settlement = settle(
            BookingStatus::Waitlisted,
            &fare,
            departure(),
            departure() - Duration::minutes(30),
            &RefundPolicy::default(),
        );
        assert_eq!(settlement.charge, Money::new(120, 0));
    }

    #[test]
    fn test_charge_is_capped_at_total() {
        let fare = quote(
            10,
            Money::new(1, 0),
            &[Passenger::new("A", 30, Gender::Male)],
            &FarePolicy::default(),
        );
        let settlement = settle(
            BookingStatus::Rac,
            &fare,
            departure(),
            departure() - Duration::hours(100),
            &RefundPolicy::default(),
        );
        assert_eq!(settlement.charge, fare.total);
        assert_eq!(settlement.refund, Money::ZERO);
    }
}
