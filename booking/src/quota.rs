//! Quota allocation policy.
//!
//! Two fixed rules decide where a request may draw seats from:
//!
//! - **Probe order**: reserved quotas overflow into GENERAL, GENERAL has no
//!   fallback, TATKAL is isolated in both directions.
//! - **Carve-out**: when a shard is first opened, each non-general quota gets
//!   a percentage of the class capacity (rounded down) and a contiguous run
//!   of seat indices; GENERAL takes the remainder.

use crate::types::Quota;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::Range;

const GENERAL_ONLY: &[Quota] = &[Quota::General];
const TATKAL_ONLY: &[Quota] = &[Quota::Tatkal];
const LADIES_CHAIN: &[Quota] = &[Quota::Ladies, Quota::General];
const SENIOR_CHAIN: &[Quota] = &[Quota::SeniorCitizen, Quota::General];
const HANDICAPPED_CHAIN: &[Quota] = &[Quota::PhysicallyHandicapped, Quota::General];
const DEFENCE_CHAIN: &[Quota] = &[Quota::Defence, Quota::General];
const RAILWAY_CHAIN: &[Quota] = &[Quota::RailwayEmployee, Quota::General];

/// Records a request for `quota` may be served from, in probe order.
#[must_use]
pub const fn probe_order(quota: Quota) -> &'static [Quota] {
    match quota {
        Quota::General => GENERAL_ONLY,
        Quota::Tatkal => TATKAL_ONLY,
        Quota::Ladies => LADIES_CHAIN,
        Quota::SeniorCitizen => SENIOR_CHAIN,
        Quota::PhysicallyHandicapped => HANDICAPPED_CHAIN,
        Quota::Defence => DEFENCE_CHAIN,
        Quota::RailwayEmployee => RAILWAY_CHAIN,
    }
}

/// One quota's slice of a class.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaCarve {
    /// Quota
    pub quota: Quota,
    /// Seats owned by the quota
    pub capacity: u32,
    /// Seat indices owned by the quota, `capacity` long
    pub seats: Range<u32>,
    /// RAC slots beyond capacity
    pub rac_allowance: u32,
}

/// Percentage of class capacity reserved per non-general quota.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct QuotaPlan {
    shares: BTreeMap<Quota, u32>,
}

impl QuotaPlan {
    /// A plan that leaves everything to GENERAL
    #[must_use]
    pub fn general_only() -> Self {
        Self::default()
    }

    /// Reserve `percent` of each class for `quota`.
    ///
    /// GENERAL's share is always the remainder and cannot be set. Shares that
    /// would push the reserved total past 100% are reduced to fit.
    #[must_use]
    pub fn with_share(mut self, quota: Quota, percent: u32) -> Self {
        if quota == Quota::General {
            return self;
        }
        self.shares.remove(&quota);
        let reserved: u32 = self.shares.values().sum();
        let percent = percent.min(100_u32.saturating_sub(reserved));
        if percent > 0 {
            self.shares.insert(quota, percent);
        }
        self
    }

    /// Reserved share for `quota`; GENERAL reports its remainder.
    #[must_use]
    pub fn share(&self, quota: Quota) -> u32 {
        if quota == Quota::General {
            100_u32.saturating_sub(self.shares.values().sum())
        } else {
            self.shares.get(&quota).copied().unwrap_or(0)
        }
    }

    /// Split a class of `capacity` seats and `rac_allowance` RAC slots.
    ///
    /// Returns one carve per quota, GENERAL first. Seat ranges are
    /// contiguous and together cover `0..capacity` exactly.
    #[must_use]
    pub fn carve(&self, capacity: u32, rac_allowance: u32) -> Vec<QuotaCarve> {
        let portion = |total: u32, percent: u32| {
            u32::try_from(u64::from(total) * u64::from(percent) / 100).unwrap_or(0)
        };

        let reserved: Vec<(Quota, u32, u32)> = Quota::ALL
            .into_iter()
            .filter(|quota| *quota != Quota::General)
            .map(|quota| {
                let share = self.share(quota);
                (quota, portion(capacity, share), portion(rac_allowance, share))
            })
            .collect();

        let reserved_seats: u32 = reserved.iter().map(|(_, seats, _)| seats).sum();
        let reserved_rac: u32 = reserved.iter().map(|(_, _, rac)| rac).sum();
        let general_seats = capacity.saturating_sub(reserved_seats);

        let mut carves = Vec::with_capacity(Quota::ALL.len());
        carves.push(QuotaCarve {
            quota: Quota::General,
            capacity: general_seats,
            seats: 0..general_seats,
            rac_allowance: rac_allowance.saturating_sub(reserved_rac),
        });

        let mut next = general_seats;
        for (quota, seats, rac) in reserved {
            carves.push(QuotaCarve {
                quota,
                capacity: seats,
                seats: next..next + seats,
                rac_allowance: rac,
            });
            next += seats;
        }
        carves
    }
}
