//! Shared fixtures for the reservation integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use berth_booking::notify::BookingNotice;
use berth_booking::quota::QuotaPlan;
use berth_booking::types::{ClassConfig, Stop};
use berth_booking::{
    BookingPolicy, BookingRequest, ClassType, Config, Gender, InMemorySchedule, Money, Passenger,
    RecordingNotifier, ReservationService, ShardKey, ShardState, Train, TrainId,
};
use berth_runtime::ShardStore;
use berth_testing::ManualClock;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use std::sync::Arc;
use std::time::Duration;

pub const TRAIN: &str = "12951";

/// 2025-01-01T00:00Z, two months before travel.
pub fn start() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

pub fn travel_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
}

/// 17:00 IST from MMCT on the travel date.
pub fn departure() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2025-03-01T11:30:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// MMCT -> BRC -> NDLS with a two-berth AC3A class and a roomy sleeper class,
/// plus a 500-unit chair car shuttle for fare checks.
pub fn schedule() -> InMemorySchedule {
    InMemorySchedule::new()
        .with_train(
            Train::new(TRAIN, "Mumbai Rajdhani")
                .with_utc_offset_minutes(330)
                .with_stop(Stop::new("MMCT", None, NaiveTime::from_hms_opt(17, 0, 0), 0, 0))
                .with_stop(Stop::new(
                    "BRC",
                    NaiveTime::from_hms_opt(21, 0, 0),
                    NaiveTime::from_hms_opt(21, 10, 0),
                    0,
                    392,
                ))
                .with_stop(Stop::new("NDLS", NaiveTime::from_hms_opt(8, 30, 0), None, 1, 892))
                .with_class(ClassType::Ac3A, ClassConfig::new(2, Money::new(2, 0)))
                .with_class(ClassType::Sleeper, ClassConfig::new(72, Money::new(1, 0))),
        )
        .with_train(
            Train::new("22222", "Shuttle")
                .with_stop(Stop::new("AAA", None, NaiveTime::from_hms_opt(6, 0, 0), 0, 0))
                .with_stop(Stop::new("BBB", NaiveTime::from_hms_opt(12, 0, 0), None, 0, 500))
                .with_class(ClassType::ChairCar, ClassConfig::new(78, Money::new(2, 0))),
        )
}

/// GENERAL only, AC3A with one RAC slot and a waitlist of five.
pub fn small_class_policy() -> BookingPolicy {
    BookingPolicy::default()
        .with_quotas(QuotaPlan::general_only())
        .with_rac_allowance(ClassType::Ac3A, 1)
        .with_waitlist_ceiling(5)
}

pub struct Harness {
    pub service: ReservationService,
    pub clock: Arc<ManualClock>,
    pub notifier: Arc<RecordingNotifier>,
}

pub fn harness(policy: BookingPolicy) -> Harness {
    let config = Config {
        policy,
        ..Config::default()
    };
    harness_with(&config, None)
}

pub fn harness_with(
    config: &Config,
    store: Option<Arc<dyn ShardStore<ShardKey, ShardState>>>,
) -> Harness {
    let clock = Arc::new(ManualClock::new(start()));
    let notifier = Arc::new(RecordingNotifier::new());
    let schedule = Arc::new(schedule());
    let service = match store {
        Some(store) => ReservationService::with_store(
            config,
            clock.clone(),
            schedule,
            notifier.clone(),
            store,
        ),
        None => ReservationService::new(config, clock.clone(), schedule, notifier.clone()),
    };
    Harness {
        service,
        clock,
        notifier,
    }
}

pub fn ac3a_key() -> ShardKey {
    ShardKey::new(TrainId::new(TRAIN), travel_date(), ClassType::Ac3A)
}

pub fn request(class: ClassType, name: &str, age: u8) -> BookingRequest {
    BookingRequest::new(TrainId::new(TRAIN), travel_date(), class, "MMCT", "NDLS")
        .with_passenger(Passenger::new(name, age, Gender::Female))
}

/// Notifications run after commit on spawned tasks; poll until `count` arrive.
pub async fn notices(notifier: &RecordingNotifier, count: usize) -> Vec<BookingNotice> {
    for _ in 0..200 {
        let seen = notifier.notices();
        if seen.len() >= count {
            return seen;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "expected {count} notifications, saw {}",
        notifier.notices().len()
    );
}
