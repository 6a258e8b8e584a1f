//! Booking aggregate: the lifecycle of bookings inside one shard.
//!
//! A shard is one class of one train on one travel date. Its state holds the
//! inventory ledger and every booking ever made against it. The shard
//! coordinator runs this reducer on a copy of the last committed state and
//! commits the copy only when the reducer answers `Ok`, so a rejected or
//! failed operation never leaves a trace.
//!
//! ```text
//!              create                 cancel
//! requested ──────────► CONFIRMED ───────────► CANCELLED
//!     │                   ▲   │ chart
//!     │ create            │   └──────► CHART_PREPARED
//!     ├─────────────► RAC ┘ promote
//!     │                ▲ │ chart ────► CHART_PREPARED
//!     │ create         │ │
//!     └────────► WAITLISTED ─ chart ──► CANCELLED (full refund)
//! ```

use crate::aggregates::ledger::{Holding, InventoryLedger};
use crate::config::BookingPolicy;
use crate::error::BookingError;
use crate::notify::{BookingNotice, BookingNotifier};
use crate::quota::probe_order;
use crate::refund::{self, Settlement};
use crate::route::{self, Journey};
use crate::schedule::ScheduleProvider;
use crate::types::{
    Booking, BookingId, BookingStatus, CancellationInfo, CancellationReason, ClassType, Money,
    Passenger, Pnr, Quota, ShardKey, StationCode, Train, TrainId, UserId, seats_required,
};
use berth_core::effect::{Effect, Effects};
use berth_core::environment::Clock;
use berth_core::reducer::Reducer;
use berth_runtime::ShardFault;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use smallvec::{SmallVec, smallvec};
use std::collections::HashMap;
use std::sync::Arc;

/// Oldest age accepted on a booking
pub const MAX_PASSENGER_AGE: u8 = 125;

// ============================================================================
// Requests and Replies
// ============================================================================

/// A request to book seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingRequest {
    /// Train
    pub train_id: TrainId,
    /// Date the train leaves its origin
    pub travel_date: NaiveDate,
    /// Class
    pub class: ClassType,
    /// Quota asked for
    pub quota: Quota,
    /// Boarding station
    pub source: StationCode,
    /// Alighting station
    pub destination: StationCode,
    /// Travellers
    pub passengers: Vec<Passenger>,
    /// Booking account, if any
    pub user_id: Option<UserId>,
}

impl BookingRequest {
    /// General-quota request with no passengers yet
    #[must_use]
    pub fn new(
        train_id: TrainId,
        travel_date: NaiveDate,
        class: ClassType,
        source: impl AsRef<str>,
        destination: impl AsRef<str>,
    ) -> Self {
        Self {
            train_id,
            travel_date,
            class,
            quota: Quota::General,
            source: StationCode::new(source),
            destination: StationCode::new(destination),
            passengers: Vec::new(),
            user_id: None,
        }
    }

    /// Ask for a specific quota
    #[must_use]
    pub const fn with_quota(mut self, quota: Quota) -> Self {
        self.quota = quota;
        self
    }

    /// Add a traveller
    #[must_use]
    pub fn with_passenger(mut self, passenger: Passenger) -> Self {
        self.passengers.push(passenger);
        self
    }

    /// Attach the booking account
    #[must_use]
    pub fn for_user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Shard the request is served by
    #[must_use]
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::new(self.train_id.clone(), self.travel_date, self.class)
    }
}

/// Operations applied to a shard.
#[derive(Debug, Clone)]
pub enum BookingAction {
    /// Book seats
    Create {
        /// Id for the new booking
        booking_id: BookingId,
        /// PNR reserved for the new booking
        pnr: Pnr,
        /// What to book
        request: BookingRequest,
    },
    /// Cancel at the passenger's request
    Cancel {
        /// Booking
        booking_id: BookingId,
        /// PNR the passenger presented
        pnr: Pnr,
    },
    /// Freeze the manifest before departure
    PrepareChart {
        /// Shard to chart
        key: ShardKey,
    },
}

/// A booking moved up a queue by a cancellation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Promotion {
    /// Booking
    pub booking_id: BookingId,
    /// Its PNR
    pub pnr: Pnr,
    /// Status before
    pub from: BookingStatus,
    /// Status after
    pub to: BookingStatus,
}

/// Result of chart preparation, per shard or summed over a train.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartSummary {
    /// Confirmed and RAC bookings frozen into the chart
    pub promoted: usize,
    /// Waitlisted bookings cancelled
    pub auto_cancelled: usize,
    /// Money returned to auto-cancelled bookings
    pub refunded: Money,
}

impl ChartSummary {
    /// Add another shard's summary
    #[must_use]
    pub const fn merge(self, other: Self) -> Self {
        Self {
            promoted: self.promoted + other.promoted,
            auto_cancelled: self.auto_cancelled + other.auto_cancelled,
            refunded: self.refunded.saturating_add(other.refunded),
        }
    }
}

/// Successful outcome of a [`BookingAction`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookingReply {
    /// The booking as created
    Booked(Booking),
    /// The cancelled booking and whoever moved up behind it
    Cancelled {
        /// Cancelled booking
        booking: Booking,
        /// Promotions in the order applied
        promotions: Vec<Promotion>,
    },
    /// Chart prepared
    Charted(ChartSummary),
}

// ============================================================================
// Shard State
// ============================================================================

/// Everything one shard owns.
///
/// `Default` is an unopened shard; it is opened from the timetable on first
/// use.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardState {
    key: Option<ShardKey>,
    ledger: InventoryLedger,
    bookings: HashMap<BookingId, Booking>,
    charted: bool,
}

impl ShardState {
    /// Open a shard: carve the class into quota records.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] when the train does not offer the class.
    pub fn initialize(key: ShardKey, train: &Train, policy: &BookingPolicy) -> Result<Self, BookingError> {
        let class = train.class(key.class).ok_or_else(|| {
            BookingError::Validation(format!("Train {} has no {} class", train.id, key.class))
        })?;
        let carves = policy
            .quotas
            .carve(class.capacity, policy.rac_allowance(key.class));
        let ledger = InventoryLedger::open(&key, &carves, policy.waitlist_ceiling);

        tracing::debug!(shard = %key, capacity = class.capacity, "Shard opened");
        Ok(Self {
            key: Some(key),
            ledger,
            bookings: HashMap::new(),
            charted: false,
        })
    }

    /// Whether the shard has been opened
    #[must_use]
    pub const fn is_initialized(&self) -> bool {
        self.key.is_some()
    }

    /// Shard key, once opened
    #[must_use]
    pub const fn key(&self) -> Option<&ShardKey> {
        self.key.as_ref()
    }

    /// Inventory ledger
    #[must_use]
    pub const fn ledger(&self) -> &InventoryLedger {
        &self.ledger
    }

    /// Whether chart preparation has run
    #[must_use]
    pub const fn is_charted(&self) -> bool {
        self.charted
    }

    /// A booking by id
    #[must_use]
    pub fn booking(&self, id: BookingId) -> Option<&Booking> {
        self.bookings.get(&id)
    }

    /// Every booking, in no particular order
    pub fn bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values()
    }

    /// 1-based queue position of an RAC or waitlisted booking (`RAC 2`, `WL 5`)
    #[must_use]
    pub fn queue_position(&self, id: BookingId) -> Option<usize> {
        let booking = self.bookings.get(&id)?;
        let record = self.ledger.record(booking.allocated_quota)?;
        match booking.status {
            BookingStatus::Rac => record.rac_queue().position(id),
            BookingStatus::Waitlisted => record.waitlist().position(id),
            _ => None,
        }
    }

    /// The counter a booking is counted under, if any.
    ///
    /// Charted bookings stay on the manifest: those with berths count as
    /// confirmed, the rest as RAC.
    fn counted_as(booking: &Booking) -> Option<Holding> {
        match booking.status {
            BookingStatus::ChartPrepared if booking.seat_allocations.is_empty() => Some(Holding::Rac),
            BookingStatus::ChartPrepared => Some(Holding::Confirmed),
            status => Holding::from_status(status),
        }
    }

    /// Check every ledger bound and that counts, queues and seats agree with
    /// the bookings.
    ///
    /// # Errors
    ///
    /// [`BookingError::InvariantViolation`] describing the first failure.
    pub fn verify(&self) -> Result<(), BookingError> {
        self.ledger.verify()?;

        let mut expected: HashMap<(Quota, Holding), u32> = HashMap::new();
        for booking in self.bookings.values() {
            let seats = booking.seats_required();
            let holds_berths = matches!(
                Self::counted_as(booking),
                Some(Holding::Confirmed)
            );
            let assigned = u32::try_from(booking.seat_allocations.len()).unwrap_or(u32::MAX);
            if assigned != if holds_berths { seats } else { 0 } {
                return Err(BookingError::InvariantViolation(format!(
                    "booking {} in {} holds {assigned} berths",
                    booking.pnr, booking.status
                )));
            }

            if let Some(holding) = Self::counted_as(booking) {
                *expected.entry((booking.allocated_quota, holding)).or_default() += seats;
            }

            let record = self.ledger.record(booking.allocated_quota).ok_or_else(|| {
                BookingError::InvariantViolation(format!(
                    "booking {} allocated to unknown quota {}",
                    booking.pnr, booking.allocated_quota
                ))
            })?;
            let in_rac = record.rac_queue().contains(booking.id);
            let in_waitlist = record.waitlist().contains(booking.id);
            let queued_right = match booking.status {
                BookingStatus::Rac => in_rac && !in_waitlist,
                BookingStatus::Waitlisted => in_waitlist && !in_rac,
                _ => !in_rac && !in_waitlist,
            };
            if !queued_right {
                return Err(BookingError::InvariantViolation(format!(
                    "booking {} in {} has inconsistent queue membership",
                    booking.pnr, booking.status
                )));
            }
        }

        for record in self.ledger.records() {
            for holding in [Holding::Confirmed, Holding::Rac, Holding::Waitlisted] {
                let want = expected.get(&(record.quota(), holding)).copied().unwrap_or(0);
                if record.count(holding) != want {
                    return Err(BookingError::InvariantViolation(format!(
                        "{} {holding} count is {}, bookings hold {want}",
                        record.quota(),
                        record.count(holding)
                    )));
                }
            }
            let queued = record.rac_queue().len() + record.waitlist().len();
            let owners = record
                .rac_queue()
                .iter()
                .chain(record.waitlist().iter())
                .filter(|entry| self.bookings.contains_key(&entry.booking_id))
                .count();
            if owners != queued {
                return Err(BookingError::InvariantViolation(format!(
                    "{} queue holds entries for unknown bookings",
                    record.quota()
                )));
            }
        }
        Ok(())
    }
}

// ============================================================================
// Environment
// ============================================================================

/// Dependencies of the booking reducer.
#[derive(Clone)]
pub struct BookingEnvironment {
    /// Clock for timestamps and booking windows
    pub clock: Arc<dyn Clock>,
    /// Timetable lookup
    pub schedule: Arc<dyn ScheduleProvider>,
    /// Notification delivery
    pub notifier: Arc<dyn BookingNotifier>,
    /// Business rules
    pub policy: BookingPolicy,
}

impl BookingEnvironment {
    /// Creates a new `BookingEnvironment`
    #[must_use]
    pub fn new(
        clock: Arc<dyn Clock>,
        schedule: Arc<dyn ScheduleProvider>,
        notifier: Arc<dyn BookingNotifier>,
        policy: BookingPolicy,
    ) -> Self {
        Self {
            clock,
            schedule,
            notifier,
            policy,
        }
    }
}

// ============================================================================
// Reducer
// ============================================================================

/// Reducer output
pub type BookingOutcome = Result<BookingReply, BookingError>;

/// The booking state machine.
#[derive(Debug, Clone, Copy, Default)]
pub struct BookingReducer;

impl BookingReducer {
    /// Creates a new `BookingReducer`
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Look up a train.
    fn train(env: &BookingEnvironment, id: &TrainId) -> Result<Arc<Train>, BookingError> {
        env.schedule
            .train(id)
            .ok_or_else(|| BookingError::Validation(format!("Unknown train {id}")))
    }

    /// Validate passengers on a request.
    fn validate_passengers(passengers: &[Passenger], policy: &BookingPolicy) -> Result<(), String> {
        if passengers.is_empty() {
            return Err("At least one passenger is required".to_string());
        }
        if passengers.len() > policy.max_passengers {
            return Err(format!(
                "At most {} passengers per booking (requested: {})",
                policy.max_passengers,
                passengers.len()
            ));
        }
        if let Some(index) = passengers.iter().position(|p| p.name.trim().is_empty()) {
            return Err(format!("Passenger {} has no name", index + 1));
        }
        if let Some(p) = passengers.iter().find(|p| p.age() > MAX_PASSENGER_AGE) {
            return Err(format!("Implausible age {} for {}", p.age(), p.name));
        }
        if seats_required(passengers) == 0 {
            return Err("Infants must travel with a passenger who occupies a seat".to_string());
        }
        Ok(())
    }

    /// Validate the train and date of a request; returns the resolved journey
    /// and the departure time from the boarding station.
    fn validate_journey(
        request: &BookingRequest,
        train: &Train,
        policy: &BookingPolicy,
        now: DateTime<Utc>,
    ) -> Result<(Journey, DateTime<Utc>), BookingError> {
        let invalid = |message: String| Err(BookingError::Validation(message));

        if !train.active {
            return invalid(format!("Train {} is not running", train.id));
        }
        if train.class(request.class).is_none() {
            return invalid(format!("Train {} has no {} class", train.id, request.class));
        }
        if !train.operates_on(request.travel_date) {
            return invalid(format!(
                "Train {} does not run on {}",
                train.id, request.travel_date
            ));
        }

        let local_now = now + Duration::minutes(i64::from(train.utc_offset_minutes));
        let today = local_now.date_naive();
        if request.travel_date < today {
            return invalid(format!("Travel date {} is in the past", request.travel_date));
        }
        if request.travel_date > today + Duration::days(policy.advance_booking_days) {
            return invalid(format!(
                "Travel date {} is more than {} days ahead",
                request.travel_date, policy.advance_booking_days
            ));
        }

        let journey = route::resolve(train, &request.source, &request.destination)?;
        let Some(departure_at) = train.departure_at(request.travel_date, journey.from_index) else {
            return invalid(format!("No departure time at {}", request.source));
        };
        if departure_at <= now {
            return invalid(format!(
                "Train {} has already left {}",
                train.id, request.source
            ));
        }
        Ok((journey, departure_at))
    }

    /// Open the shard if this is its first operation.
    fn ensure_initialized(
        state: &mut ShardState,
        key: &ShardKey,
        train: &Train,
        policy: &BookingPolicy,
    ) -> Result<(), BookingError> {
        match state.key() {
            Some(existing) if existing == key => Ok(()),
            Some(existing) => Err(BookingError::InvariantViolation(format!(
                "shard {existing} received an operation for {key}"
            ))),
            None => {
                *state = ShardState::initialize(key.clone(), train, policy)?;
                Ok(())
            },
        }
    }

    /// Where a group of `seats` lands: the first tier any record in the probe
    /// chain admits, trying confirmed, then RAC, then waitlist.
    fn place(
        ledger: &InventoryLedger,
        class: ClassType,
        quota: Quota,
        seats: u32,
    ) -> Result<(Quota, Holding), BookingError> {
        let chain = probe_order(quota);
        for holding in [Holding::Confirmed, Holding::Rac, Holding::Waitlisted] {
            let admitted = chain
                .iter()
                .copied()
                .find(|q| ledger.record(*q).is_some_and(|r| r.admits(holding, seats)));
            if let Some(found) = admitted {
                return Ok((found, holding));
            }
        }

        let any_capacity = chain
            .iter()
            .any(|q| ledger.record(*q).is_some_and(|r| r.capacity() > 0));
        if any_capacity {
            Err(BookingError::CapacityExceeded {
                class,
                quota,
                requested: seats,
            })
        } else {
            Err(BookingError::QuotaExhausted { class, quota })
        }
    }

    fn create(
        state: &mut ShardState,
        booking_id: BookingId,
        pnr: Pnr,
        request: BookingRequest,
        env: &BookingEnvironment,
    ) -> Result<Booking, BookingError> {
        if let Some(existing) = state.booking(booking_id) {
            return Ok(existing.clone());
        }

        let now = env.clock.now();
        Self::validate_passengers(&request.passengers, &env.policy).map_err(BookingError::Validation)?;
        let train = Self::train(env, &request.train_id)?;
        let (journey, departure_at) = Self::validate_journey(&request, &train, &env.policy, now)?;

        let key = request.shard_key();
        Self::ensure_initialized(state, &key, &train, &env.policy)?;
        if state.charted {
            return Err(BookingError::Validation(format!(
                "Chart already prepared for {key}"
            )));
        }

        let seats = seats_required(&request.passengers);
        let (quota, holding) = Self::place(&state.ledger, request.class, request.quota, seats)?;

        let rate = train
            .class(request.class)
            .map(|class| class.base_fare_per_unit)
            .unwrap_or_default();
        let fare = crate::fare::quote(journey.distance, rate, &request.passengers, &env.policy.fare);

        let record = state.ledger.record_mut(quota).ok_or_else(|| {
            BookingError::InvariantViolation(format!("{key} has no {quota} record"))
        })?;
        let seat_allocations = match holding {
            Holding::Confirmed => record.confirm(&request.passengers)?,
            Holding::Rac | Holding::Waitlisted => {
                record.hold(holding, booking_id, seats)?;
                Vec::new()
            },
        };

        let booking = Booking {
            id: booking_id,
            pnr,
            user_id: request.user_id,
            train_id: request.train_id,
            source: request.source,
            destination: request.destination,
            travel_date: request.travel_date,
            class: request.class,
            requested_quota: request.quota,
            allocated_quota: quota,
            status: holding.status(),
            passengers: request.passengers,
            seat_allocations,
            fare,
            cancellation: None,
            departure_at,
            created_at: now,
            updated_at: now,
        };
        state.bookings.insert(booking_id, booking.clone());

        tracing::info!(
            shard = %key,
            pnr = %booking.pnr,
            status = %booking.status,
            quota = %quota,
            seats,
            total = %booking.fare.total,
            "Booking created"
        );
        Ok(booking)
    }

    fn cancel(
        state: &mut ShardState,
        booking_id: BookingId,
        pnr: &Pnr,
        env: &BookingEnvironment,
    ) -> Result<(Booking, Vec<Promotion>), BookingError> {
        let now = env.clock.now();
        let booking = state
            .bookings
            .get(&booking_id)
            .filter(|b| &b.pnr == pnr)
            .ok_or_else(|| BookingError::NotFound(pnr.clone()))?;

        let status = booking.status;
        let charted_cancel = status == BookingStatus::ChartPrepared && env.policy.allow_cancel_after_chart;
        if !booking.is_cancellable() && !charted_cancel {
            return Err(BookingError::InvalidTransition {
                pnr: pnr.clone(),
                status,
                operation: "cancel",
            });
        }

        let settlement = if charted_cancel {
            Settlement::forfeit(booking.fare.total)
        } else {
            refund::settle(status, &booking.fare, booking.departure_at, now, &env.policy.refund)
        };
        let holding = ShardState::counted_as(booking).ok_or_else(|| {
            BookingError::InvariantViolation(format!("booking {pnr} in {status} holds nothing"))
        })?;
        let quota = booking.allocated_quota;
        let seats = booking.seats_required();

        let record = state.ledger.record_mut(quota).ok_or_else(|| {
            BookingError::InvariantViolation(format!("no {quota} record for booking {pnr}"))
        })?;
        let booking = state.bookings.get_mut(&booking_id).ok_or_else(|| BookingError::NotFound(pnr.clone()))?;
        if charted_cancel {
            record.release_unqueued(holding, seats, &booking.seat_allocations)?;
        } else {
            record.release(holding, booking_id, seats, &booking.seat_allocations)?;
        }

        booking.status = BookingStatus::Cancelled;
        booking.seat_allocations.clear();
        booking.updated_at = now;
        booking.cancellation = Some(CancellationInfo {
            cancelled_at: now,
            charge: settlement.charge,
            refund: settlement.refund,
            reason: CancellationReason::PassengerRequested,
            previous_status: status,
        });
        let cancelled = booking.clone();

        tracing::info!(
            pnr = %pnr,
            from = %status,
            charge = %settlement.charge,
            refund = %settlement.refund,
            "Booking cancelled"
        );

        // A charted manifest is final; nobody moves up behind a late cancellation.
        let promotions = if charted_cancel {
            Vec::new()
        } else {
            Self::promote(state, quota, now)?
        };
        Ok((cancelled, promotions))
    }

    /// Promotion cascade on one record: RAC heads into freed berths, then
    /// waitlist heads into freed RAC slots. Strict FIFO: a head that does not
    /// fit stops its queue.
    fn promote(state: &mut ShardState, quota: Quota, now: DateTime<Utc>) -> Result<Vec<Promotion>, BookingError> {
        let mut promotions = Vec::new();

        for (from, to) in [(Holding::Rac, Holding::Confirmed), (Holding::Waitlisted, Holding::Rac)] {
            loop {
                let record = state.ledger.record_mut(quota).ok_or_else(|| {
                    BookingError::InvariantViolation(format!("no {quota} record"))
                })?;
                let queue = match from {
                    Holding::Rac => record.rac_queue(),
                    _ => record.waitlist(),
                };
                let Some(head) = queue.peek_head() else {
                    break;
                };
                let (booking_id, seats) = (head.booking_id, head.seats);
                if !record.promotable(to, seats) {
                    break;
                }

                let booking = state.bookings.get_mut(&booking_id).ok_or_else(|| {
                    BookingError::InvariantViolation(format!("queued booking {booking_id} is missing"))
                })?;
                record.release(from, booking_id, seats, &[])?;
                match to {
                    Holding::Confirmed => {
                        booking.seat_allocations = record.confirm(&booking.passengers)?;
                    },
                    _ => {
                        record.hold(to, booking_id, seats)?;
                    },
                }
                booking.status = to.status();
                booking.updated_at = now;

                tracing::info!(pnr = %booking.pnr, from = %from, to = %to, "Booking promoted");
                promotions.push(Promotion {
                    booking_id,
                    pnr: booking.pnr.clone(),
                    from: from.status(),
                    to: to.status(),
                });
            }
        }
        Ok(promotions)
    }

    fn prepare_chart(
        state: &mut ShardState,
        key: &ShardKey,
        env: &BookingEnvironment,
    ) -> Result<(ChartSummary, Vec<Booking>), BookingError> {
        let train = Self::train(env, &key.train_id)?;
        Self::ensure_initialized(state, key, &train, &env.policy)?;
        if state.charted {
            return Ok((ChartSummary::default(), Vec::new()));
        }

        let now = env.clock.now();
        let mut summary = ChartSummary::default();
        let mut auto_cancelled = Vec::new();

        for record in state.ledger.records_mut() {
            let waiting: Vec<(BookingId, u32)> = record
                .waitlist()
                .iter()
                .map(|entry| (entry.booking_id, entry.seats))
                .collect();
            for (booking_id, seats) in waiting {
                record.release(Holding::Waitlisted, booking_id, seats, &[])?;
                let booking = state.bookings.get_mut(&booking_id).ok_or_else(|| {
                    BookingError::InvariantViolation(format!("queued booking {booking_id} is missing"))
                })?;
                let settlement = Settlement::full_refund(booking.fare.total);
                booking.status = BookingStatus::Cancelled;
                booking.updated_at = now;
                booking.cancellation = Some(CancellationInfo {
                    cancelled_at: now,
                    charge: settlement.charge,
                    refund: settlement.refund,
                    reason: CancellationReason::AutoCancelledWaitlist,
                    previous_status: BookingStatus::Waitlisted,
                });
                summary.auto_cancelled += 1;
                summary.refunded = summary.refunded.saturating_add(settlement.refund);
                auto_cancelled.push(booking.clone());
            }
            record.freeze_rac_queue();
        }

        for booking in state.bookings.values_mut() {
            if matches!(booking.status, BookingStatus::Confirmed | BookingStatus::Rac) {
                booking.status = BookingStatus::ChartPrepared;
                booking.updated_at = now;
                summary.promoted += 1;
            }
        }
        state.charted = true;

        tracing::info!(
            shard = %key,
            charted = summary.promoted,
            auto_cancelled = summary.auto_cancelled,
            "Chart prepared"
        );
        Ok((summary, auto_cancelled))
    }

    /// One fire-and-forget effect per notice.
    fn notify(env: &BookingEnvironment, notices: Vec<BookingNotice>) -> Effects<BookingAction> {
        let deliveries: Vec<Effect<BookingAction>> = notices
            .into_iter()
            .map(|notice| {
                let notifier = Arc::clone(&env.notifier);
                Effect::fire_and_forget(async move {
                    let kind = notice.kind();
                    let pnr = notice.booking().pnr.clone();
                    if let Err(error) = notifier.notify(notice).await {
                        tracing::warn!(%error, kind, %pnr, "Notification not delivered");
                    }
                })
            })
            .collect();

        match deliveries.len() {
            0 => SmallVec::new(),
            1 => deliveries.into_iter().collect(),
            _ => smallvec![Effect::merge(deliveries)],
        }
    }
}

impl Reducer for BookingReducer {
    type State = ShardState;
    type Action = BookingAction;
    type Environment = BookingEnvironment;
    type Output = BookingOutcome;

    fn reduce(
        &self,
        state: &mut Self::State,
        action: Self::Action,
        env: &Self::Environment,
    ) -> (Self::Output, Effects<Self::Action>) {
        let result = match action {
            BookingAction::Create {
                booking_id,
                pnr,
                request,
            } => Self::create(state, booking_id, pnr, request, env).map(|booking| {
                let notices = vec![BookingNotice::Created(booking.clone())];
                (BookingReply::Booked(booking), notices)
            }),

            BookingAction::Cancel { booking_id, pnr } => {
                Self::cancel(state, booking_id, &pnr, env).map(|(booking, promotions)| {
                    let mut notices = vec![BookingNotice::Cancelled(booking.clone())];
                    notices.extend(promotions.iter().filter_map(|promotion| {
                        state.booking(promotion.booking_id).map(|promoted| BookingNotice::Promoted {
                            booking: promoted.clone(),
                            from: promotion.from,
                        })
                    }));
                    (BookingReply::Cancelled { booking, promotions }, notices)
                })
            },

            BookingAction::PrepareChart { key } => {
                Self::prepare_chart(state, &key, env).map(|(summary, cancelled)| {
                    let notices = cancelled.into_iter().map(BookingNotice::Cancelled).collect();
                    (BookingReply::Charted(summary), notices)
                })
            },
        };

        // A rejected operation's working copy is thrown away, so only
        // successful transitions need checking.
        let result = result.and_then(|reply| state.verify().map(|()| reply));

        match result {
            Ok((reply, notices)) => (Ok(reply), Self::notify(env, notices)),
            Err(error) => {
                if error.is_fatal() {
                    tracing::error!(%error, "Shard state failed verification");
                } else {
                    tracing::debug!(%error, kind = error.kind(), "Booking operation rejected");
                }
                (Err(error), SmallVec::new())
            },
        }
    }
}
