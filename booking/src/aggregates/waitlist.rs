//! FIFO queues for RAC and waitlisted bookings.
//!
//! Entries are ordered by a sequence number drawn at enqueue time. Sequence
//! numbers only grow and are never reassigned, so removing an entry from the
//! middle (a direct cancellation) leaves everyone else's position intact.
//!
//! Slot `i` of the queue always holds sequence `front + i`. Removing by id
//! looks the sequence up in the index and blanks that slot in O(1); blank
//! slots reaching the head are trimmed, so head operations stay amortized
//! O(1).

use crate::types::{BookingId, Quota, ShardKey};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};

/// A booking's place in a queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistEntry {
    /// Queued booking
    pub booking_id: BookingId,
    /// Shard the queue belongs to
    pub shard: ShardKey,
    /// Quota record the queue belongs to
    pub quota: Quota,
    /// FIFO position, unique within the queue
    pub sequence: u64,
    /// Seats the booking needs
    pub seats: u32,
}

/// One ordered queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitlistQueue {
    next_sequence: u64,
    /// Sequence of `slots[0]`
    front: u64,
    /// `None` marks an entry removed from the middle
    slots: VecDeque<Option<WaitlistEntry>>,
    index: HashMap<BookingId, u64>,
}

impl WaitlistQueue {
    /// Empty queue
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a booking, returning its sequence number.
    ///
    /// A booking already queued keeps its original place.
    pub fn enqueue(&mut self, shard: &ShardKey, quota: Quota, booking_id: BookingId, seats: u32) -> u64 {
        if let Some(sequence) = self.index.get(&booking_id) {
            return *sequence;
        }
        self.next_sequence += 1;
        let sequence = self.next_sequence;
        if self.slots.is_empty() {
            self.front = sequence;
        }
        self.slots.push_back(Some(WaitlistEntry {
            booking_id,
            shard: shard.clone(),
            quota,
            sequence,
            seats,
        }));
        self.index.insert(booking_id, sequence);
        sequence
    }

    /// Earliest entry
    #[must_use]
    pub fn peek_head(&self) -> Option<&WaitlistEntry> {
        self.slots.front().and_then(Option::as_ref)
    }

    /// Remove and return the earliest entry
    pub fn pop_head(&mut self) -> Option<WaitlistEntry> {
        let entry = self.slots.pop_front().flatten()?;
        self.front += 1;
        self.index.remove(&entry.booking_id);
        self.trim();
        Some(entry)
    }

    /// Remove a booking wherever it stands
    pub fn remove(&mut self, booking_id: BookingId) -> Option<WaitlistEntry> {
        let sequence = self.index.remove(&booking_id)?;
        let slot = usize::try_from(sequence.checked_sub(self.front)?).ok()?;
        let entry = self.slots.get_mut(slot)?.take();
        self.trim();
        entry
    }

    /// Drop blank slots at the head.
    fn trim(&mut self) {
        while matches!(self.slots.front(), Some(None)) {
            self.slots.pop_front();
            self.front += 1;
        }
    }

    /// Whether the booking is queued
    #[must_use]
    pub fn contains(&self, booking_id: BookingId) -> bool {
        self.index.contains_key(&booking_id)
    }

    /// 1-based position of a booking, as printed on a ticket (`WL 3`)
    #[must_use]
    pub fn position(&self, booking_id: BookingId) -> Option<usize> {
        let sequence = *self.index.get(&booking_id)?;
        Some(self.iter().take_while(|entry| entry.sequence <= sequence).count())
    }

    /// Entries in FIFO order
    pub fn iter(&self) -> impl Iterator<Item = &WaitlistEntry> {
        self.slots.iter().flatten()
    }

    /// Number of queued bookings
    #[must_use]
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Whether the queue is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Seats needed by everyone queued
    #[must_use]
    pub fn seats(&self) -> u32 {
        self.iter().map(|entry| entry.seats).sum()
    }

    /// Empty the queue; sequence numbers keep counting from where they were
    pub fn drain(&mut self) -> Vec<WaitlistEntry> {
        self.index.clear();
        self.front = self.next_sequence + 1;
        std::mem::take(&mut self.slots).into_iter().flatten().collect()
    }

    /// Check that the index and the ordered slots agree.
    ///
    /// # Errors
    ///
    /// A description of the first inconsistency found.
    pub fn verify(&self) -> Result<(), String> {
        let live = self.iter().count();
        if self.index.len() != live {
            return Err(format!(
                "queue index holds {} ids for {live} entries",
                self.index.len()
            ));
        }
        if matches!(self.slots.front(), Some(None)) {
            return Err("queue head is a removed slot".to_string());
        }
        for (expected, slot) in (self.front..).zip(&self.slots) {
            let Some(entry) = slot else {
                continue;
            };
            if entry.sequence != expected {
                return Err(format!("sequence {} sits in slot for {expected}", entry.sequence));
            }
            if entry.sequence > self.next_sequence {
                return Err(format!("sequence {} was never issued", entry.sequence));
            }
            if self.index.get(&entry.booking_id) != Some(&entry.sequence) {
                return Err(format!(
                    "booking {} is not indexed at {}",
                    entry.booking_id, entry.sequence
                ));
            }
        }
        Ok(())
    }
}
