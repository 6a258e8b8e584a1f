//! Inventory ledger: seat counts per quota inside one shard.
//!
//! Each [`InventoryRecord`] owns a slice of a class (its quota's seats) and
//! counts the seat-occupying passengers holding confirmed, RAC and waitlist
//! positions against it. The record also owns the free seat pool and the two
//! promotion queues, so a count and the queue or seats behind it always
//! change together.

use crate::aggregates::waitlist::{WaitlistEntry, WaitlistQueue};
use crate::error::BookingError;
use crate::quota::QuotaCarve;
use crate::types::{BookingId, BookingStatus, ClassType, Passenger, Quota, SeatAllocation, ShardKey};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;
use thiserror::Error;

// ============================================================================
// Errors
// ============================================================================

/// A ledger operation that would break its bookkeeping.
///
/// Reaching any of these means the shard's state is wrong; they surface as
/// [`BookingError::InvariantViolation`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// A count would go negative
    #[error("{quota} {holding} count underflow: releasing {released} of {held}")]
    Underflow {
        /// Record
        quota: Quota,
        /// Counter
        holding: Holding,
        /// Current value
        held: u32,
        /// Amount released
        released: u32,
    },

    /// Confirmation attempted without enough free seats
    #[error("{quota} has {free} free seats, {needed} needed")]
    SeatShortage {
        /// Record
        quota: Quota,
        /// Seats asked for
        needed: u32,
        /// Seats free
        free: usize,
    },

    /// A queued booking is missing from its queue
    #[error("booking {booking_id} has no {holding} queue entry in {quota}")]
    MissingQueueEntry {
        /// Record
        quota: Quota,
        /// Queue
        holding: Holding,
        /// Booking
        booking_id: BookingId,
    },

    /// A bound or cross-check failed
    #[error("{0}")]
    Inconsistent(String),
}

impl From<LedgerError> for BookingError {
    fn from(error: LedgerError) -> Self {
        Self::InvariantViolation(error.to_string())
    }
}

// ============================================================================
// Holdings
// ============================================================================

/// The three counters of a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Holding {
    /// Seat assigned
    Confirmed,
    /// Travels, no berth yet
    Rac,
    /// Queued
    Waitlisted,
}

impl Holding {
    /// Booking status for a booking holding this position
    #[must_use]
    pub const fn status(self) -> BookingStatus {
        match self {
            Self::Confirmed => BookingStatus::Confirmed,
            Self::Rac => BookingStatus::Rac,
            Self::Waitlisted => BookingStatus::Waitlisted,
        }
    }

    /// Holding for a live booking status
    #[must_use]
    pub const fn from_status(status: BookingStatus) -> Option<Self> {
        match status {
            BookingStatus::Confirmed => Some(Self::Confirmed),
            BookingStatus::Rac => Some(Self::Rac),
            BookingStatus::Waitlisted => Some(Self::Waitlisted),
            BookingStatus::Cancelled | BookingStatus::ChartPrepared => None,
        }
    }
}

impl std::fmt::Display for Holding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.status(), f)
    }
}

// ============================================================================
// Seat Pool
// ============================================================================

/// Free seat indices of one quota, lowest first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatPool {
    free: BTreeSet<u32>,
}

impl SeatPool {
    /// Pool holding every seat in `range`
    #[must_use]
    pub fn new(range: Range<u32>) -> Self {
        Self {
            free: range.collect(),
        }
    }

    /// Number of free seats
    #[must_use]
    pub fn len(&self) -> usize {
        self.free.len()
    }

    /// Whether no seat is free
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.free.is_empty()
    }

    /// Assign one seat to every seat-occupying passenger.
    ///
    /// A passenger's berth preference wins when a seat of that type is free;
    /// otherwise the lowest free seat is taken. Returns `None` (and takes
    /// nothing) when there are not enough free seats.
    #[must_use]
    pub fn take(&mut self, class: ClassType, passengers: &[Passenger]) -> Option<Vec<SeatAllocation>> {
        let needed = passengers.iter().filter(|p| p.occupies_seat()).count();
        if needed > self.free.len() {
            return None;
        }

        let mut allocations = Vec::with_capacity(needed);
        for (passenger_index, passenger) in passengers.iter().enumerate() {
            if !passenger.occupies_seat() {
                continue;
            }
            let preferred = passenger.berth_preference.and_then(|berth| {
                self.free
                    .iter()
                    .copied()
                    .find(|seat| class.locate(*seat).2 == berth)
            });
            let seat_index = preferred.or_else(|| self.free.first().copied())?;
            self.free.remove(&seat_index);

            let (coach, seat_number, berth_type) = class.locate(seat_index);
            allocations.push(SeatAllocation {
                passenger_index,
                passenger_name: passenger.name.clone(),
                coach,
                seat_number,
                berth_type,
                seat_index,
            });
        }
        Some(allocations)
    }

    /// Return seats to the pool
    pub fn give_back(&mut self, allocations: &[SeatAllocation]) {
        self.free.extend(allocations.iter().map(|a| a.seat_index));
    }
}

// ============================================================================
// Inventory Record
// ============================================================================

/// Counts and queues of one quota in one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    shard: ShardKey,
    quota: Quota,
    capacity: u32,
    rac_allowance: u32,
    waitlist_ceiling: u32,
    seat_range: Range<u32>,
    confirmed: u32,
    rac: u32,
    waitlisted: u32,
    version: u64,
    seats: SeatPool,
    rac_queue: WaitlistQueue,
    waitlist: WaitlistQueue,
}

impl InventoryRecord {
    /// Fresh record for one quota carve
    #[must_use]
    pub fn new(shard: ShardKey, carve: &QuotaCarve, waitlist_ceiling: u32) -> Self {
        Self {
            shard,
            quota: carve.quota,
            capacity: carve.capacity,
            rac_allowance: carve.rac_allowance,
            waitlist_ceiling,
            seat_range: carve.seats.clone(),
            confirmed: 0,
            rac: 0,
            waitlisted: 0,
            version: 0,
            seats: SeatPool::new(carve.seats.clone()),
            rac_queue: WaitlistQueue::new(),
            waitlist: WaitlistQueue::new(),
        }
    }

    /// Quota
    #[must_use]
    pub const fn quota(&self) -> Quota {
        self.quota
    }

    /// Seats owned by the quota
    #[must_use]
    pub const fn capacity(&self) -> u32 {
        self.capacity
    }

    /// RAC slots beyond capacity
    #[must_use]
    pub const fn rac_allowance(&self) -> u32 {
        self.rac_allowance
    }

    /// Waitlist bound
    #[must_use]
    pub const fn waitlist_ceiling(&self) -> u32 {
        self.waitlist_ceiling
    }

    /// Confirmed passengers
    #[must_use]
    pub const fn confirmed(&self) -> u32 {
        self.confirmed
    }

    /// RAC passengers
    #[must_use]
    pub const fn rac(&self) -> u32 {
        self.rac
    }

    /// Waitlisted passengers
    #[must_use]
    pub const fn waitlisted(&self) -> u32 {
        self.waitlisted
    }

    /// Bumped on every change
    #[must_use]
    pub const fn version(&self) -> u64 {
        self.version
    }

    /// Seats not yet confirmed to anyone
    #[must_use]
    pub const fn remaining_capacity(&self) -> u32 {
        self.capacity.saturating_sub(self.confirmed)
    }

    /// RAC queue
    #[must_use]
    pub const fn rac_queue(&self) -> &WaitlistQueue {
        &self.rac_queue
    }

    /// Waitlist queue
    #[must_use]
    pub const fn waitlist(&self) -> &WaitlistQueue {
        &self.waitlist
    }

    /// Value of one counter
    #[must_use]
    pub const fn count(&self, holding: Holding) -> u32 {
        match holding {
            Holding::Confirmed => self.confirmed,
            Holding::Rac => self.rac,
            Holding::Waitlisted => self.waitlisted,
        }
    }

    /// Whether a new booking of `seats` passengers fits at `holding`.
    ///
    /// A new booking is confirmed only while nobody waits at RAC and the
    /// combined confirmed plus RAC bound still holds afterwards. RAC and
    /// waitlist positions need a record with real capacity.
    #[must_use]
    pub fn admits(&self, holding: Holding, seats: u32) -> bool {
        match holding {
            Holding::Confirmed => {
                self.rac_queue.is_empty()
                    && self.has_berths_for(seats)
                    && self.within_combined(seats)
            },
            Holding::Rac => self.capacity > 0 && self.within_combined(seats),
            Holding::Waitlisted => {
                self.capacity > 0 && within(self.waitlisted, seats, self.waitlist_ceiling)
            },
        }
    }

    /// Whether a queued booking of `seats` passengers can move up to `to`.
    ///
    /// The RAC head being promoted already counts towards the combined bound,
    /// so confirming it needs only free berths.
    #[must_use]
    pub fn promotable(&self, to: Holding, seats: u32) -> bool {
        match to {
            Holding::Confirmed => self.has_berths_for(seats),
            Holding::Rac | Holding::Waitlisted => self.admits(to, seats),
        }
    }

    fn has_berths_for(&self, seats: u32) -> bool {
        within(self.confirmed, seats, self.capacity) && self.seats.len() >= seats as usize
    }

    fn within_combined(&self, seats: u32) -> bool {
        within(
            self.confirmed.saturating_add(self.rac),
            seats,
            self.capacity.saturating_add(self.rac_allowance),
        )
    }

    fn counter_mut(&mut self, holding: Holding) -> &mut u32 {
        match holding {
            Holding::Confirmed => &mut self.confirmed,
            Holding::Rac => &mut self.rac,
            Holding::Waitlisted => &mut self.waitlisted,
        }
    }

    fn queue_mut(&mut self, holding: Holding) -> Option<&mut WaitlistQueue> {
        match holding {
            Holding::Confirmed => None,
            Holding::Rac => Some(&mut self.rac_queue),
            Holding::Waitlisted => Some(&mut self.waitlist),
        }
    }

    /// Confirm a group: count the seat-occupying passengers and assign seats.
    ///
    /// # Errors
    ///
    /// [`LedgerError::SeatShortage`] when the pool cannot seat everyone.
    pub fn confirm(&mut self, passengers: &[Passenger]) -> Result<Vec<SeatAllocation>, LedgerError> {
        let needed = crate::types::seats_required(passengers);
        let free = self.seats.len();
        let allocations = self
            .seats
            .take(self.shard.class, passengers)
            .ok_or(LedgerError::SeatShortage {
                quota: self.quota,
                needed,
                free,
            })?;
        self.confirmed = self.confirmed.saturating_add(needed);
        self.version += 1;
        Ok(allocations)
    }

    /// Queue a booking at RAC or waitlist and count its seats.
    ///
    /// Returns the queue sequence number.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Inconsistent`] when asked to queue a confirmed holding.
    pub fn hold(&mut self, holding: Holding, booking_id: BookingId, seats: u32) -> Result<u64, LedgerError> {
        let shard = self.shard.clone();
        let quota = self.quota;
        let queue = self.queue_mut(holding).ok_or_else(|| {
            LedgerError::Inconsistent(format!("confirmed holdings are not queued ({quota})"))
        })?;
        let sequence = queue.enqueue(&shard, quota, booking_id, seats);
        let counter = self.counter_mut(holding);
        *counter = counter.saturating_add(seats);
        self.version += 1;
        Ok(sequence)
    }

    /// Give up a holding: decrement its counter, return its seats and drop
    /// its queue entry.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Underflow`] or [`LedgerError::MissingQueueEntry`].
    pub fn release(
        &mut self,
        holding: Holding,
        booking_id: BookingId,
        seats: u32,
        allocations: &[SeatAllocation],
    ) -> Result<(), LedgerError> {
        let quota = self.quota;
        if let Some(queue) = self.queue_mut(holding) {
            queue.remove(booking_id).ok_or(LedgerError::MissingQueueEntry {
                quota,
                holding,
                booking_id,
            })?;
        }
        self.release_unqueued(holding, seats, allocations)
    }

    /// As [`release`](Self::release) for a holding that is no longer queued
    /// (a charted booking).
    ///
    /// # Errors
    ///
    /// [`LedgerError::Underflow`].
    pub fn release_unqueued(
        &mut self,
        holding: Holding,
        seats: u32,
        allocations: &[SeatAllocation],
    ) -> Result<(), LedgerError> {
        let quota = self.quota;
        let counter = self.counter_mut(holding);
        *counter = counter.checked_sub(seats).ok_or(LedgerError::Underflow {
            quota,
            holding,
            held: *counter,
            released: seats,
        })?;
        self.seats.give_back(allocations);
        self.version += 1;
        Ok(())
    }

    /// Take every RAC entry out of its queue without touching the count.
    ///
    /// Used by chart preparation: RAC passengers stay on the manifest.
    pub fn freeze_rac_queue(&mut self) -> Vec<WaitlistEntry> {
        let entries = self.rac_queue.drain();
        if !entries.is_empty() {
            self.version += 1;
        }
        entries
    }

    /// Check bounds, seat pool and queue integrity.
    ///
    /// # Errors
    ///
    /// [`LedgerError::Inconsistent`] describing the first failed check.
    pub fn verify(&self) -> Result<(), LedgerError> {
        let fail = |what: String| Err(LedgerError::Inconsistent(format!("{} {}: {what}", self.shard, self.quota)));

        if self.confirmed > self.capacity {
            return fail(format!("confirmed {} exceeds capacity {}", self.confirmed, self.capacity));
        }
        if u64::from(self.confirmed) + u64::from(self.rac)
            > u64::from(self.capacity) + u64::from(self.rac_allowance)
        {
            return fail(format!(
                "confirmed {} + rac {} exceeds capacity {} + allowance {}",
                self.confirmed, self.rac, self.capacity, self.rac_allowance
            ));
        }
        if self.waitlisted > self.waitlist_ceiling {
            return fail(format!(
                "waitlisted {} exceeds ceiling {}",
                self.waitlisted, self.waitlist_ceiling
            ));
        }
        if self.seats.len() + self.confirmed as usize != self.capacity as usize {
            return fail(format!(
                "{} free seats with {} confirmed of {}",
                self.seats.len(),
                self.confirmed,
                self.capacity
            ));
        }
        if self
            .seats
            .free
            .iter()
            .any(|seat| !self.seat_range.contains(seat))
        {
            return fail("free seat outside the quota's range".to_string());
        }
        if self.waitlist.seats() != self.waitlisted {
            return fail(format!(
                "waitlist holds {} seats, count is {}",
                self.waitlist.seats(),
                self.waitlisted
            ));
        }
        if self.rac_queue.seats() > self.rac {
            return fail(format!(
                "rac queue holds {} seats, count is {}",
                self.rac_queue.seats(),
                self.rac
            ));
        }
        self.rac_queue.verify().map_err(LedgerError::Inconsistent)?;
        self.waitlist.verify().map_err(LedgerError::Inconsistent)
    }
}

// ============================================================================
// Ledger
// ============================================================================

/// All quota records of one shard.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryLedger {
    records: BTreeMap<Quota, InventoryRecord>,
}

impl InventoryLedger {
    /// One record per carve
    #[must_use]
    pub fn open(shard: &ShardKey, carves: &[QuotaCarve], waitlist_ceiling: u32) -> Self {
        Self {
            records: carves
                .iter()
                .map(|carve| {
                    (
                        carve.quota,
                        InventoryRecord::new(shard.clone(), carve, waitlist_ceiling),
                    )
                })
                .collect(),
        }
    }

    /// Record of a quota
    #[must_use]
    pub fn record(&self, quota: Quota) -> Option<&InventoryRecord> {
        self.records.get(&quota)
    }

    /// Mutable record of a quota
    pub fn record_mut(&mut self, quota: Quota) -> Option<&mut InventoryRecord> {
        self.records.get_mut(&quota)
    }

    /// Records in quota order
    pub fn records(&self) -> impl Iterator<Item = &InventoryRecord> {
        self.records.values()
    }

    /// Mutable records in quota order
    pub fn records_mut(&mut self) -> impl Iterator<Item = &mut InventoryRecord> {
        self.records.values_mut()
    }

    /// Verify every record
    ///
    /// # Errors
    ///
    /// The first record failure.
    pub fn verify(&self) -> Result<(), LedgerError> {
        self.records.values().try_for_each(InventoryRecord::verify)
    }
}

fn within(held: u32, more: u32, bound: u32) -> bool {
    held.checked_add(more).is_some_and(|n| n <= bound)
}
