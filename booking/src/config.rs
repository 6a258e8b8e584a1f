//! Configuration management for the reservation service.
//!
//! Loads configuration from environment variables with sensible defaults.
//! Amounts are given in minor units (paise).
//!
//! | Variable | Default |
//! |----------|---------|
//! | `BOOKING_CONVENIENCE_FEE_MINOR` | 2000 |
//! | `BOOKING_MINIMUM_FARE_MINOR` | 1500 |
//! | `BOOKING_FLAT_CANCELLATION_CHARGE_MINOR` | 6000 |
//! | `BOOKING_MID_WINDOW_PERCENT` | 25 |
//! | `BOOKING_FLAT_WINDOW_HOURS` | 48 |
//! | `BOOKING_CUTOFF_HOURS` | 4 |
//! | `BOOKING_RAC_ALLOWANCE_<CLASS>` (e.g. `_AC3A`, `_SL`, `_2S`) | per class |
//! | `BOOKING_QUOTA_SHARE_<QUOTA>` (e.g. `_TATKAL`, `_LADIES`) | 10 / 5 / 5 / 0 |
//! | `BOOKING_WAITLIST_CEILING` | 100 |
//! | `BOOKING_MAX_PASSENGERS` | 6 |
//! | `BOOKING_ADVANCE_DAYS` | 120 |
//! | `BOOKING_ALLOW_CANCEL_AFTER_CHART` | false |
//! | `PNR_MAX_ATTEMPTS` | 8 |
//! | `SHARD_MAX_QUEUE_DEPTH` | 256 |
//! | `SHARD_BUSY_RETRY_AFTER_MS` | 50 |
//! | `SHARD_MAX_RETRIES` | 5 |
//! | `SHARD_RETRY_INITIAL_DELAY_MS` | 2 |
//! | `SHARD_RETRY_MAX_DELAY_MS` | 100 |

use crate::fare::FarePolicy;
use crate::pnr::DEFAULT_MAX_ATTEMPTS;
use crate::quota::QuotaPlan;
use crate::refund::RefundPolicy;
use crate::types::{ClassType, Money, Quota};
use berth_runtime::{CoordinatorConfig, RetryPolicy};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Business rules
    pub policy: BookingPolicy,
    /// Shard coordinator tuning
    pub coordinator: CoordinatorSettings,
    /// PNR draws before giving up
    pub pnr_max_attempts: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            policy: BookingPolicy::default(),
            coordinator: CoordinatorSettings::default(),
            pnr_max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Business rules applied by the booking state machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingPolicy {
    /// Fare knobs
    pub fare: FarePolicy,
    /// Cancellation knobs
    pub refund: RefundPolicy,
    /// Quota carve-out
    pub quotas: QuotaPlan,
    /// RAC slots beyond capacity, per class; missing classes use the built-in default
    pub rac_allowance: BTreeMap<ClassType, u32>,
    /// Waitlist length per quota record
    pub waitlist_ceiling: u32,
    /// Passengers allowed on one booking
    pub max_passengers: usize,
    /// How far ahead a journey can be booked, in days
    pub advance_booking_days: i64,
    /// Whether charted bookings may still be cancelled (with no refund)
    pub allow_cancel_after_chart: bool,
}

/// Built-in RAC allowance for a class. Seating classes have no RAC.
#[must_use]
pub const fn default_rac_allowance(class: ClassType) -> u32 {
    match class {
        ClassType::Ac2A => 4,
        ClassType::Ac3A => 8,
        ClassType::Sleeper => 18,
        ClassType::Ac1A
        | ClassType::ChairCar
        | ClassType::ExecutiveChair
        | ClassType::FirstClass
        | ClassType::SecondSitting => 0,
    }
}

impl BookingPolicy {
    /// RAC slots beyond capacity for `class`
    #[must_use]
    pub fn rac_allowance(&self, class: ClassType) -> u32 {
        self.rac_allowance
            .get(&class)
            .copied()
            .unwrap_or_else(|| default_rac_allowance(class))
    }

    /// Override the RAC allowance of one class
    #[must_use]
    pub fn with_rac_allowance(mut self, class: ClassType, allowance: u32) -> Self {
        self.rac_allowance.insert(class, allowance);
        self
    }

    /// Replace the quota plan
    #[must_use]
    pub fn with_quotas(mut self, quotas: QuotaPlan) -> Self {
        self.quotas = quotas;
        self
    }

    /// Set the waitlist ceiling
    #[must_use]
    pub const fn with_waitlist_ceiling(mut self, ceiling: u32) -> Self {
        self.waitlist_ceiling = ceiling;
        self
    }

    /// Allow or forbid cancelling charted bookings
    #[must_use]
    pub const fn with_cancel_after_chart(mut self, allow: bool) -> Self {
        self.allow_cancel_after_chart = allow;
        self
    }
}

impl Default for BookingPolicy {
    fn default() -> Self {
        Self {
            fare: FarePolicy::default(),
            refund: RefundPolicy::default(),
            quotas: QuotaPlan::general_only()
                .with_share(Quota::Tatkal, 10)
                .with_share(Quota::Ladies, 5)
                .with_share(Quota::SeniorCitizen, 5),
            rac_allowance: BTreeMap::new(),
            waitlist_ceiling: 100,
            max_passengers: 6,
            advance_booking_days: 120,
            allow_cancel_after_chart: false,
        }
    }
}

/// Shard coordinator tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    /// Pending operations per shard before `ServiceBusy`
    pub max_queue_depth: usize,
    /// Retry hint returned with `ServiceBusy`, in milliseconds
    pub busy_retry_after_ms: u64,
    /// Version-conflict retries before `ServiceBusy`
    pub max_retries: usize,
    /// First conflict backoff, in milliseconds
    pub retry_initial_delay_ms: u64,
    /// Backoff cap, in milliseconds
    pub retry_max_delay_ms: u64,
    /// Idle time before a shard worker retires, in milliseconds; 0 keeps
    /// workers forever
    pub idle_timeout_ms: u64,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            max_queue_depth: 256,
            busy_retry_after_ms: 50,
            max_retries: 5,
            retry_initial_delay_ms: 2,
            retry_max_delay_ms: 100,
            idle_timeout_ms: 300_000,
        }
    }
}

impl CoordinatorSettings {
    /// Runtime configuration for the shard coordinator
    #[must_use]
    pub fn to_coordinator_config(&self) -> CoordinatorConfig {
        CoordinatorConfig::default()
            .with_max_queue_depth(self.max_queue_depth)
            .with_busy_retry_after(Duration::from_millis(self.busy_retry_after_ms))
            .with_retry_policy(
                RetryPolicy::builder()
                    .max_retries(self.max_retries)
                    .initial_delay(Duration::from_millis(self.retry_initial_delay_ms))
                    .max_delay(Duration::from_millis(self.retry_max_delay_ms))
                    .build(),
            )
            .with_idle_timeout(
                (self.idle_timeout_ms > 0).then_some(Duration::from_millis(self.idle_timeout_ms)),
            )
    }
}

fn var_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Unset or unparsable variables fall back to their defaults.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = BookingPolicy::default();

        let mut quotas = QuotaPlan::general_only();
        for quota in Quota::ALL {
            let share = var_or(
                &format!("BOOKING_QUOTA_SHARE_{}", quota.name()),
                defaults.quotas.share(quota),
            );
            quotas = quotas.with_share(quota, share);
        }

        let rac_allowance = ClassType::ALL
            .into_iter()
            .map(|class| {
                let allowance = var_or(
                    &format!("BOOKING_RAC_ALLOWANCE_{}", class.code()),
                    default_rac_allowance(class),
                );
                (class, allowance)
            })
            .collect();

        let coordinator = CoordinatorSettings::default();

        Self {
            policy: BookingPolicy {
                fare: FarePolicy {
                    convenience_fee: Money::from_minor(var_or(
                        "BOOKING_CONVENIENCE_FEE_MINOR",
                        defaults.fare.convenience_fee.minor(),
                    )),
                    minimum_fare: Money::from_minor(var_or(
                        "BOOKING_MINIMUM_FARE_MINOR",
                        defaults.fare.minimum_fare.minor(),
                    )),
                },
                refund: RefundPolicy {
                    flat_charge: Money::from_minor(var_or(
                        "BOOKING_FLAT_CANCELLATION_CHARGE_MINOR",
                        defaults.refund.flat_charge.minor(),
                    )),
                    mid_window_percent: var_or(
                        "BOOKING_MID_WINDOW_PERCENT",
                        defaults.refund.mid_window_percent,
                    )
                    .min(100),
                    flat_window_hours: var_or(
                        "BOOKING_FLAT_WINDOW_HOURS",
                        defaults.refund.flat_window_hours,
                    ),
                    cutoff_hours: var_or("BOOKING_CUTOFF_HOURS", defaults.refund.cutoff_hours),
                },
                quotas,
                rac_allowance,
                waitlist_ceiling: var_or("BOOKING_WAITLIST_CEILING", defaults.waitlist_ceiling),
                max_passengers: var_or("BOOKING_MAX_PASSENGERS", defaults.max_passengers).max(1),
                advance_booking_days: var_or(
                    "BOOKING_ADVANCE_DAYS",
                    defaults.advance_booking_days,
                ),
                allow_cancel_after_chart: var_or(
                    "BOOKING_ALLOW_CANCEL_AFTER_CHART",
                    defaults.allow_cancel_after_chart,
                ),
            },
            coordinator: CoordinatorSettings {
                max_queue_depth: var_or("SHARD_MAX_QUEUE_DEPTH", coordinator.max_queue_depth),
                busy_retry_after_ms: var_or(
                    "SHARD_BUSY_RETRY_AFTER_MS",
                    coordinator.busy_retry_after_ms,
                ),
                max_retries: var_or("SHARD_MAX_RETRIES", coordinator.max_retries),
                retry_initial_delay_ms: var_or(
                    "SHARD_RETRY_INITIAL_DELAY_MS",
                    coordinator.retry_initial_delay_ms,
                ),
                retry_max_delay_ms: var_or(
                    "SHARD_RETRY_MAX_DELAY_MS",
                    coordinator.retry_max_delay_ms,
                ),
                idle_timeout_ms: var_or("SHARD_IDLE_TIMEOUT_MS", coordinator.idle_timeout_ms),
            },
            pnr_max_attempts: var_or("PNR_MAX_ATTEMPTS", DEFAULT_MAX_ATTEMPTS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_policy_matches_documented_values() {
        let policy = BookingPolicy::default();
        assert_eq!(policy.fare.convenience_fee, Money::new(20, 0));
        assert_eq!(policy.max_passengers, 6);
        assert_eq!(policy.quotas.share(Quota::General), 80);
        assert_eq!(policy.rac_allowance(ClassType::Sleeper), 18);
        assert_eq!(policy.rac_allowance(ClassType::ChairCar), 0);
        assert!(!policy.allow_cancel_after_chart);
    }

    #[test]
    fn test_class_override_beats_built_in_allowance() {
        let policy = BookingPolicy::default().with_rac_allowance(ClassType::Ac3A, 1);
        assert_eq!(policy.rac_allowance(ClassType::Ac3A), 1);
        assert_eq!(policy.rac_allowance(ClassType::Ac2A), 4);
    }

    #[test]
    fn test_zero_idle_timeout_keeps_workers() {
        let settings = CoordinatorSettings {
            idle_timeout_ms: 0,
            ..CoordinatorSettings::default()
        };
        assert_eq!(settings.to_coordinator_config().idle_timeout, None);
        assert_eq!(
            CoordinatorSettings::default().to_coordinator_config().idle_timeout,
            Some(Duration::from_secs(300))
        );
    }

    #[test]
    fn test_unset_environment_yields_defaults() {
        // None of these variables are set by the test harness.
        let config = Config::from_env();
        assert_eq!(config.coordinator, CoordinatorSettings::default());
        assert_eq!(config.pnr_max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert_eq!(config.policy.waitlist_ceiling, 100);
    }
}
