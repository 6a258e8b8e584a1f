//! PNR issuance and lookup.
//!
//! A PNR is reserved before its booking reaches the shard and stays bound to
//! it once the booking commits. A reservation whose booking never commits is
//! released, so the registry only remembers PNRs of live or in-flight
//! bookings and no committed number is ever handed out twice.

use crate::error::BookingError;
use crate::types::{BookingId, Pnr, ShardKey};
use rand::Rng;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// Lowest PNR drawn; keeps every PNR ten significant digits long.
pub const PNR_MIN: u64 = 1_000_000_000;

/// Highest PNR drawn.
pub const PNR_MAX: u64 = 9_999_999_999;

/// Default draw attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

type Generator = Box<dyn Fn() -> u64 + Send + Sync>;

/// Process-wide PNR index: PNR -> shard and booking.
pub struct PnrRegistry {
    entries: Mutex<HashMap<Pnr, (ShardKey, BookingId)>>,
    generator: Generator,
    max_attempts: u32,
}

impl PnrRegistry {
    /// Registry drawing uniformly random ten-digit numbers
    #[must_use]
    pub fn new() -> Self {
        Self::with_generator(|| rand::thread_rng().gen_range(PNR_MIN..=PNR_MAX))
    }

    /// Registry drawing candidates from `generator`
    #[must_use]
    pub fn with_generator(generator: impl Fn() -> u64 + Send + Sync + 'static) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            generator: Box::new(generator),
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set how many candidates are drawn before [`BookingError::PnrExhausted`]
    #[must_use]
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts.max(1);
        self
    }

    /// Draw a PNR no one has held before and bind it to `booking_id`.
    ///
    /// # Errors
    ///
    /// [`BookingError::PnrExhausted`] when every candidate drawn was taken.
    pub fn issue(&self, shard: &ShardKey, booking_id: BookingId) -> Result<Pnr, BookingError> {
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        for attempt in 1..=self.max_attempts {
            let candidate = Pnr::from_number((self.generator)());
            match entries.entry(candidate) {
                Entry::Vacant(slot) => {
                    let pnr = slot.key().clone();
                    slot.insert((shard.clone(), booking_id));
                    return Ok(pnr);
                },
                Entry::Occupied(taken) => {
                    tracing::debug!(pnr = %taken.key(), attempt, "PNR collision, drawing again");
                },
            }
        }

        tracing::error!(
            attempts = self.max_attempts,
            issued = entries.len(),
            "Could not draw an unused PNR"
        );
        Err(BookingError::PnrExhausted)
    }

    /// Drop a reservation whose booking was never committed.
    ///
    /// Returns whether `pnr` was reserved.
    pub fn release(&self, pnr: &Pnr) -> bool {
        let released = self
            .entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(pnr)
            .is_some();
        if released {
            tracing::debug!(pnr = %pnr, "PNR reservation released");
        }
        released
    }

    /// Where the booking holding `pnr` lives.
    #[must_use]
    pub fn locate(&self, pnr: &Pnr) -> Option<(ShardKey, BookingId)> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pnr)
            .cloned()
    }

    /// Number of PNRs issued so far
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been issued yet
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PnrRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PnrRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PnrRegistry")
            .field("issued", &self.len())
            .field("max_attempts", &self.max_attempts)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::types::{ClassType, TrainId};
    use chrono::NaiveDate;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    fn shard() -> ShardKey {
        ShardKey::new(
            TrainId::new("12951"),
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            ClassType::Ac3A,
        )
    }

    #[test]
    fn test_issued_pnrs_are_ten_digits_and_locatable() {
        let registry = PnrRegistry::new();
        let id = BookingId::new();
        let pnr = registry.issue(&shard(), id).unwrap();

        assert!(Pnr::parse(pnr.as_str()).is_some());
        assert_eq!(registry.locate(&pnr), Some((shard(), id)));
    }

    #[test]
    fn test_collision_draws_again() {
        let draws = Arc::new(AtomicU64::new(0));
        let counter = Arc::clone(&draws);
        // 1st and 2nd issue both start at the same number
        let registry = PnrRegistry::with_generator(move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            PNR_MIN + n.saturating_sub(1)
        });

        let first = registry.issue(&shard(), BookingId::new()).unwrap();
        let second = registry.issue(&shard(), BookingId::new()).unwrap();
        assert_ne!(first, second);
        assert_eq!(draws.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_exhausted_when_generator_keeps_colliding() {
        let registry = PnrRegistry::with_generator(|| PNR_MIN).with_max_attempts(3);
        registry.issue(&shard(), BookingId::new()).unwrap();

        let result = registry.issue(&shard(), BookingId::new());
        assert_eq!(result, Err(BookingError::PnrExhausted));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_released_pnr_is_forgotten() {
        let registry = PnrRegistry::new();
        let kept = registry.issue(&shard(), BookingId::new()).unwrap();
        let dropped = registry.issue(&shard(), BookingId::new()).unwrap();

        assert!(registry.release(&dropped));
        assert!(!registry.release(&dropped));
        assert_eq!(registry.locate(&dropped), None);
        assert!(registry.locate(&kept).is_some());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_many_issues_are_unique() {
        let registry = PnrRegistry::new();
        let issued: HashSet<Pnr> = (0..2_000)
            .map(|_| registry.issue(&shard(), BookingId::new()).unwrap())
            .collect();
        assert_eq!(issued.len(), 2_000);
        assert_eq!(registry.len(), 2_000);
    }
}
