//! # Berth Booking
//!
//! Train seat reservation engine built on the berth runtime.
//!
//! Each class of each train on each travel date is a **shard**. All changes
//! to a shard go through one worker, so the seat counts a booking decision is
//! based on can never change underneath it. Different shards run in parallel.
//!
//! # Architecture
//!
//! ```text
//!   PnrRegistry ◄── reserve / release ── ReservationService
//!                                              │ create / cancel / chart
//!         ┌─────────── snapshots ──────────────┤
//!         ▼                                    ▼
//!   ShardStore ◄──── compare-and-swap ──── ShardCoordinator
//!                                              │ one worker per
//!                                              │ train/date/class
//!                                              ▼
//!                                        BookingReducer
//!                                              │
//!                     ┌────────────────────────┼──────────────┐
//!                     ▼                        ▼              ▼
//!               InventoryLedger            QuotaPlan     fare / refund
//!               (counts, seats,            (probe order,  (pricing and
//!                RAC/WL queues)             carve-out)     settlement)
//! ```
//!
//! # Booking Flow
//!
//! ```text
//! 1. Reserve a PNR (released again unless the booking commits)
//! 2. Validate the request against the timetable and booking window
//! 3. Probe the quota chain: confirm ─► RAC ─► waitlist ─► reject
//! 4. Price the journey
//! 5. Verify the shard's invariants and commit
//! 6. Notify (fire-and-forget, after commit)
//! ```
//!
//! Cancelling frees the booking's seats and promotes the head of the RAC
//! queue into a berth, then the head of the waitlist into RAC. Chart
//! preparation freezes the manifest and cancels whatever is still waitlisted
//! with a full refund.
//!
//! # Usage
//!
//! See [`app::ReservationService`] for the public operations and
//! [`aggregates::booking`] for the state machine and its tests.

#![forbid(unsafe_code)]

pub mod aggregates;
pub mod app;
pub mod config;
pub mod error;
pub mod fare;
pub mod metrics;
pub mod notify;
pub mod pnr;
pub mod quota;
pub mod refund;
pub mod route;
pub mod schedule;
pub mod types;

pub use aggregates::booking::{BookingReply, BookingRequest, ChartSummary, Promotion};
pub use aggregates::{BookingAction, BookingEnvironment, BookingReducer, ShardState};
pub use app::{Availability, QuotaAvailability, ReservationService};
pub use config::{BookingPolicy, Config};
pub use error::BookingError;
pub use notify::{BookingNotice, BookingNotifier, RecordingNotifier, TracingNotifier};
pub use schedule::{InMemorySchedule, ScheduleProvider};
pub use types::{
    Booking, BookingId, BookingStatus, ClassType, Gender, Money, Passenger, Pnr, Quota, ShardKey,
    StationCode, Train, TrainId,
};
