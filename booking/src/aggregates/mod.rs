//! Aggregate reducers for the reservation engine.
//!
//! - Booking: the per-shard booking state machine
//! - Ledger: per-quota counters, seat pools and queues inside a shard
//! - Waitlist: the FIFO queues RAC and waitlisted bookings wait in

pub mod booking;
pub mod ledger;
pub mod waitlist;

pub use booking::{BookingAction, BookingEnvironment, BookingReducer, ShardState};
pub use ledger::{Holding, InventoryLedger, InventoryRecord};
pub use waitlist::{WaitlistEntry, WaitlistQueue};
