//! Fare calculation.
//!
//! A passenger line is `distance × class rate`, reduced by the passenger's
//! category concession and rounded half-up to the minor unit. The booking
//! total is the sum of the lines plus a flat convenience fee.

use crate::types::{FareBreakdown, FareLine, Money, Passenger, PassengerCategory};
use serde::{Deserialize, Serialize};

/// Share of the undiscounted line a senior citizen pays
pub const SENIOR_PAYABLE_PERCENT: u32 = 60;

/// Share of the undiscounted line a child pays
pub const CHILD_PAYABLE_PERCENT: u32 = 50;

/// Fare policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarePolicy {
    /// Flat fee charged once per booking
    pub convenience_fee: Money,
    /// Lowest fare a senior concession can bring a line down to
    pub minimum_fare: Money,
}

impl Default for FarePolicy {
    fn default() -> Self {
        Self {
            convenience_fee: Money::new(20, 0),
            minimum_fare: Money::new(15, 0),
        }
    }
}

/// Fare for one passenger.
#[must_use]
pub fn line(
    passenger_index: usize,
    passenger: &Passenger,
    distance: u32,
    rate: Money,
    policy: &FarePolicy,
) -> FareLine {
    let category = passenger.category();
    let undiscounted = rate.saturating_mul(u64::from(distance));

    let (base, amount) = match category {
        PassengerCategory::Adult => (undiscounted, undiscounted),
        PassengerCategory::SeniorCitizen => {
            let discounted = undiscounted
                .percent(SENIOR_PAYABLE_PERCENT)
                .max(policy.minimum_fare)
                .min(undiscounted);
            (undiscounted, discounted)
        },
        PassengerCategory::Child => (undiscounted, undiscounted.percent(CHILD_PAYABLE_PERCENT)),
        // Lap infants are not ticketed.
        PassengerCategory::Infant => (Money::ZERO, Money::ZERO),
    };

    FareLine {
        passenger_index,
        category,
        base,
        concession: base.saturating_sub(amount),
        amount,
    }
}

/// Itemised fare for a group travelling `distance` at `rate` per unit.
#[must_use]
pub fn quote(distance: u32, rate: Money, passengers: &[Passenger], policy: &FarePolicy) -> FareBreakdown {
    let lines: Vec<FareLine> = passengers
        .iter()
        .enumerate()
        .map(|(index, passenger)| line(index, passenger, distance, rate, policy))
        .collect();

    let base_fare: Money = lines.iter().map(|l| l.base).sum();
    let concession: Money = lines.iter().map(|l| l.concession).sum();
    let payable: Money = lines.iter().map(|l| l.amount).sum();

    FareBreakdown {
        distance,
        lines,
        base_fare,
        concession,
        convenience_fee: policy.convenience_fee,
        total: payable.saturating_add(policy.convenience_fee),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Gender;

    fn policy() -> FarePolicy {
        FarePolicy::default()
    }

    #[test]
    fn test_senior_concession_on_long_journey() {
        let senior = Passenger::new("Kamala", 64, Gender::Female);
        let fare = quote(500, Money::new(2, 0), &[senior], &policy());

        assert_eq!(fare.base_fare, Money::new(1000, 0));
        assert_eq!(fare.concession, Money::new(400, 0));
        assert_eq!(fare.lines[0].amount, Money::new(600, 0));
        assert_eq!(fare.convenience_fee, Money::new(20, 0));
        assert_eq!(fare.total, Money::new(620, 0));
    }

    #[test]
    fn test_senior_fare_floors_at_minimum_but_never_above_base() {
        let senior = Passenger::new("Ravi", 70, Gender::Male);

        // 10 × 2.00 = 20.00, 60% = 12.00, floored to 15.00
        let short = line(0, &senior, 10, Money::new(2, 0), &policy());
        assert_eq!(short.amount, Money::new(15, 0));
        assert_eq!(short.concession, Money::new(5, 0));

        // 5 × 2.00 = 10.00 is already below the floor
        let tiny = line(0, &senior, 5, Money::new(2, 0), &policy());
        assert_eq!(tiny.amount, Money::new(10, 0));
        assert_eq!(tiny.concession, Money::ZERO);
    }

    #[test]
    fn test_child_half_fare_rounds_half_up_per_line() {
        let child = Passenger::new("Meera", 8, Gender::Female);
        // 3 × 0.33 = 0.99, half = 0.495 -> 0.50
        let fare = line(0, &child, 3, Money::from_minor(33), &policy());
        assert_eq!(fare.base, Money::from_minor(99));
        assert_eq!(fare.amount, Money::from_minor(50));
    }

    #[test]
    fn test_infant_travels_free_and_fee_is_per_booking() {
        let passengers = vec![
            Passenger::new("Arjun", 35, Gender::Male),
            Passenger::new("Baby", 2, Gender::Male),
        ];
        let fare = quote(100, Money::new(1, 20), &passengers, &policy());

        assert_eq!(fare.lines.len(), 2);
        assert_eq!(fare.lines[1].amount, Money::ZERO);
        assert_eq!(fare.lines[1].category, PassengerCategory::Infant);
        assert_eq!(fare.total, Money::new(140, 0));
    }
}
