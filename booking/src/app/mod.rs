//! Application layer - wires the booking reducer to the shard runtime.
//!
//! - [`ReservationService`]: create, cancel, chart and query operations

mod service;

pub use service::{Availability, QuotaAvailability, ReservationService};
