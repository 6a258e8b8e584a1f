//! Reservation service: the operations callers use.
//!
//! Mutations are routed to the shard coordinator, which serializes them per
//! train/date/class and commits with optimistic concurrency. Queries read the
//! last committed snapshot and never wait behind a shard's queue.

use crate::aggregates::booking::{BookingReply, BookingRequest, ChartSummary};
use crate::aggregates::{BookingAction, BookingEnvironment, BookingReducer, ShardState};
use crate::config::Config;
use crate::error::BookingError;
use crate::fare;
use crate::metrics;
use crate::notify::BookingNotifier;
use crate::pnr::PnrRegistry;
use crate::route;
use crate::schedule::ScheduleProvider;
use crate::types::{
    Booking, BookingId, CancellationReason, ClassType, FareBreakdown, Passenger, Pnr, Quota,
    ShardKey, StationCode, Train, TrainId,
};
use berth_core::environment::Clock;
use berth_runtime::{CoordinatorConfig, InMemoryShardStore, ShardCoordinator, ShardStore};
use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Seats left in one quota of one shard.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuotaAvailability {
    /// Quota
    pub quota: Quota,
    /// Berths carved for the quota
    pub capacity: u32,
    /// RAC slots beyond capacity
    pub rac_allowance: u32,
    /// Waitlist length limit
    pub waitlist_ceiling: u32,
    /// Seats confirmed
    pub confirmed: u32,
    /// Seats on RAC
    pub rac: u32,
    /// Seats waitlisted
    pub waitlisted: u32,
    /// Berths still free
    pub remaining_capacity: u32,
}

/// Availability of one class on one train and date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Availability {
    /// Shard
    pub key: ShardKey,
    /// Whether the chart is out (no more bookings)
    pub chart_prepared: bool,
    /// One entry per quota, in quota order
    pub quotas: Vec<QuotaAvailability>,
}

impl Availability {
    fn of(key: ShardKey, state: &ShardState) -> Self {
        let quotas = state
            .ledger()
            .records()
            .map(|record| QuotaAvailability {
                quota: record.quota(),
                capacity: record.capacity(),
                rac_allowance: record.rac_allowance(),
                waitlist_ceiling: record.waitlist_ceiling(),
                confirmed: record.confirmed(),
                rac: record.rac(),
                waitlisted: record.waitlisted(),
                remaining_capacity: record.remaining_capacity(),
            })
            .collect();
        Self {
            key,
            chart_prepared: state.is_charted(),
            quotas,
        }
    }

    /// Entry for a quota
    #[must_use]
    pub fn quota(&self, quota: Quota) -> Option<&QuotaAvailability> {
        self.quotas.iter().find(|q| q.quota == quota)
    }
}

/// The reservation engine's public API.
#[derive(Clone)]
pub struct ReservationService {
    coordinator: ShardCoordinator<ShardKey, BookingReducer>,
    pnrs: Arc<PnrRegistry>,
}

impl ReservationService {
    /// Service over an in-memory shard store
    #[must_use]
    pub fn new(
        config: &Config,
        clock: Arc<dyn Clock>,
        schedule: Arc<dyn ScheduleProvider>,
        notifier: Arc<dyn BookingNotifier>,
    ) -> Self {
        Self::with_store(config, clock, schedule, notifier, Arc::new(InMemoryShardStore::new()))
    }

    /// Service over the given shard store
    #[must_use]
    pub fn with_store(
        config: &Config,
        clock: Arc<dyn Clock>,
        schedule: Arc<dyn ScheduleProvider>,
        notifier: Arc<dyn BookingNotifier>,
        store: Arc<dyn ShardStore<ShardKey, ShardState>>,
    ) -> Self {
        let pnrs = Arc::new(PnrRegistry::new().with_max_attempts(config.pnr_max_attempts));
        let environment = BookingEnvironment::new(clock, schedule, notifier, config.policy.clone());
        Self::from_environment(environment, pnrs, store, config.coordinator.to_coordinator_config())
    }

    /// Service over a fully assembled environment and PNR registry
    #[must_use]
    pub fn from_environment(
        environment: BookingEnvironment,
        pnrs: Arc<PnrRegistry>,
        store: Arc<dyn ShardStore<ShardKey, ShardState>>,
        config: CoordinatorConfig,
    ) -> Self {
        tracing::info!(
            max_queue_depth = config.max_queue_depth,
            idle_timeout = ?config.idle_timeout,
            "Reservation service started"
        );
        Self {
            coordinator: ShardCoordinator::new(BookingReducer::new(), environment, store, config),
            pnrs,
        }
    }

    fn env(&self) -> &BookingEnvironment {
        self.coordinator.environment()
    }

    fn train(&self, id: &TrainId) -> Result<Arc<Train>, BookingError> {
        self.env()
            .schedule
            .train(id)
            .ok_or_else(|| BookingError::Validation(format!("Unknown train {id}")))
    }

    async fn submit(&self, key: ShardKey, action: BookingAction) -> Result<BookingReply, BookingError> {
        self.coordinator.submit(key, action).await?
    }

    fn unexpected(reply: &BookingReply) -> BookingError {
        BookingError::InvariantViolation(format!("unexpected shard reply: {reply:?}"))
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// Book seats.
    ///
    /// # Errors
    ///
    /// - [`BookingError::Validation`] / [`BookingError::InvalidRoute`] for a bad request
    /// - [`BookingError::CapacityExceeded`] / [`BookingError::QuotaExhausted`] when full
    /// - [`BookingError::ServiceBusy`] when the shard is saturated
    #[tracing::instrument(
        skip(self, request),
        fields(
            train = %request.train_id,
            date = %request.travel_date,
            class = %request.class,
            quota = %request.quota,
            passengers = request.passengers.len()
        )
    )]
    pub async fn create_booking(&self, request: BookingRequest) -> Result<Booking, BookingError> {
        let passengers = request.passengers.len();
        let result = self.book(request).await;

        match &result {
            Ok(booking) => {
                metrics::record_booking(booking.status, passengers);
                tracing::info!(pnr = %booking.pnr, status = %booking.status, "Booking accepted");
            },
            Err(error) => {
                metrics::record_rejection(error.kind());
                if error.is_expected_rejection() {
                    tracing::info!(%error, "Booking declined");
                } else {
                    tracing::warn!(%error, kind = error.kind(), "Booking rejected");
                }
            },
        }
        result
    }

    async fn book(&self, request: BookingRequest) -> Result<Booking, BookingError> {
        // Reject requests for trains or classes that do not exist before they
        // reach (and open) a shard.
        let train = self.train(&request.train_id)?;
        if train.class(request.class).is_none() {
            return Err(BookingError::Validation(format!(
                "Train {} has no {} class",
                train.id, request.class
            )));
        }

        // Reserved before the shard sees the request; released unless a
        // booking carrying it commits.
        let key = request.shard_key();
        let booking_id = BookingId::new();
        let pnr = self.pnrs.issue(&key, booking_id)?;
        let action = BookingAction::Create {
            booking_id,
            pnr: pnr.clone(),
            request,
        };

        let result = match self.submit(key, action).await {
            Ok(BookingReply::Booked(booking)) => Ok(booking),
            Ok(other) => Err(Self::unexpected(&other)),
            Err(error) => Err(error),
        };
        if !result.as_ref().is_ok_and(|booking| booking.pnr == pnr) {
            self.pnrs.release(&pnr);
        }
        result
    }

    /// Cancel a booking and promote whoever is next in line.
    ///
    /// # Errors
    ///
    /// - [`BookingError::NotFound`] for an unknown PNR
    /// - [`BookingError::InvalidTransition`] when the booking is already
    ///   cancelled or charted
    #[tracing::instrument(skip(self), fields(pnr = %pnr))]
    pub async fn cancel_booking(&self, pnr: &Pnr) -> Result<Booking, BookingError> {
        let (key, booking_id) = self
            .pnrs
            .locate(pnr)
            .ok_or_else(|| BookingError::NotFound(pnr.clone()))?;

        let action = BookingAction::Cancel {
            booking_id,
            pnr: pnr.clone(),
        };
        let reply = self.submit(key, action).await;
        let (booking, promotions) = match reply {
            Ok(BookingReply::Cancelled { booking, promotions }) => (booking, promotions),
            Ok(other) => return Err(Self::unexpected(&other)),
            Err(error) => {
                metrics::record_rejection(error.kind());
                tracing::warn!(%error, kind = error.kind(), "Cancellation rejected");
                return Err(error);
            },
        };

        let refund = booking
            .cancellation
            .as_ref()
            .map(|info| info.refund)
            .unwrap_or_default();
        metrics::record_cancellation(CancellationReason::PassengerRequested, refund);
        for promotion in &promotions {
            metrics::record_promotion(promotion.to);
        }
        tracing::info!(%refund, promotions = promotions.len(), "Booking cancelled");
        Ok(booking)
    }

    /// Chart every class of a train for one date.
    ///
    /// Shards are charted concurrently; charting an already charted shard is
    /// a no-op, so a partial failure can simply be retried.
    ///
    /// # Errors
    ///
    /// The first shard failure, after every shard has been attempted.
    #[tracing::instrument(skip(self), fields(train = %train_id, date = %travel_date))]
    pub async fn run_chart_preparation(
        &self,
        train_id: &TrainId,
        travel_date: NaiveDate,
    ) -> Result<ChartSummary, BookingError> {
        let train = self.train(train_id)?;
        let charts = train.classes.keys().map(|class| {
            let key = ShardKey::new(train_id.clone(), travel_date, *class);
            self.submit(key.clone(), BookingAction::PrepareChart { key })
        });

        let mut summary = ChartSummary::default();
        for reply in join_all(charts).await {
            match reply? {
                BookingReply::Charted(shard) => {
                    metrics::record_chart_prepared(shard.auto_cancelled, shard.refunded);
                    summary = summary.merge(shard);
                },
                other => return Err(Self::unexpected(&other)),
            }
        }

        tracing::info!(
            promoted = summary.promoted,
            auto_cancelled = summary.auto_cancelled,
            "Chart preparation complete"
        );
        Ok(summary)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Look a booking up by PNR.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] when no committed booking carries the PNR.
    pub async fn get_booking_by_pnr(&self, pnr: &Pnr) -> Result<Booking, BookingError> {
        let (key, booking_id) = self
            .pnrs
            .locate(pnr)
            .ok_or_else(|| BookingError::NotFound(pnr.clone()))?;

        self.coordinator
            .snapshot(&key)
            .await?
            .and_then(|snapshot| {
                snapshot
                    .state
                    .booking(booking_id)
                    .filter(|booking| &booking.pnr == pnr)
                    .cloned()
            })
            .ok_or_else(|| BookingError::NotFound(pnr.clone()))
    }

    /// 1-based RAC or waitlist position of a booking, `None` when not queued.
    ///
    /// # Errors
    ///
    /// [`BookingError::NotFound`] for an unknown PNR.
    pub async fn queue_position(&self, pnr: &Pnr) -> Result<Option<usize>, BookingError> {
        let booking = self.get_booking_by_pnr(pnr).await?;
        let snapshot = self.coordinator.snapshot(&booking.shard_key()).await?;
        Ok(snapshot.and_then(|snapshot| snapshot.state.queue_position(booking.id)))
    }

    /// Seats left per quota.
    ///
    /// A shard nobody has booked yet reports its full carve-out.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for an unknown train or a class it does
    /// not offer.
    pub async fn get_availability(
        &self,
        train_id: &TrainId,
        travel_date: NaiveDate,
        class: ClassType,
    ) -> Result<Availability, BookingError> {
        let key = ShardKey::new(train_id.clone(), travel_date, class);
        if let Some(snapshot) = self.coordinator.snapshot(&key).await? {
            return Ok(Availability::of(key, &snapshot.state));
        }

        let train = self.train(train_id)?;
        let fresh = ShardState::initialize(key.clone(), &train, &self.env().policy)?;
        Ok(Availability::of(key, &fresh))
    }

    /// Price a journey without booking it.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for an unknown train, an unoffered class
    /// or no passengers; [`BookingError::InvalidRoute`] for a bad station pair.
    pub fn fare_preview(
        &self,
        train_id: &TrainId,
        from: &StationCode,
        to: &StationCode,
        class: ClassType,
        passengers: &[Passenger],
    ) -> Result<FareBreakdown, BookingError> {
        if passengers.is_empty() {
            return Err(BookingError::Validation(
                "At least one passenger is required".to_string(),
            ));
        }
        let train = self.train(train_id)?;
        let rate = train
            .class(class)
            .ok_or_else(|| BookingError::Validation(format!("Train {train_id} has no {class} class")))?
            .base_fare_per_unit;
        let journey = route::resolve(&train, from, to)?;
        Ok(fare::quote(
            journey.distance,
            rate,
            passengers,
            &self.env().policy.fare,
        ))
    }

    /// Every booking on a train and date, across classes, oldest first.
    ///
    /// # Errors
    ///
    /// [`BookingError::Validation`] for an unknown train.
    pub async fn bookings_for_train(
        &self,
        train_id: &TrainId,
        travel_date: NaiveDate,
    ) -> Result<Vec<Booking>, BookingError> {
        let train = self.train(train_id)?;
        let mut bookings = Vec::new();
        for class in train.classes.keys() {
            let key = ShardKey::new(train_id.clone(), travel_date, *class);
            if let Some(snapshot) = self.coordinator.snapshot(&key).await? {
                bookings.extend(snapshot.state.bookings().cloned());
            }
        }
        bookings.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.pnr.as_str().cmp(b.pnr.as_str()))
        });
        Ok(bookings)
    }

    // ========================================================================
    // Operations
    // ========================================================================

    /// Whether a shard was taken out of service after failing verification
    #[must_use]
    pub fn is_quarantined(&self, key: &ShardKey) -> bool {
        self.coordinator.is_quarantined(key)
    }

    /// Pending operations on a shard
    #[must_use]
    pub fn queue_depth(&self, key: &ShardKey) -> usize {
        self.coordinator.queue_depth(key)
    }

    /// PNRs held by committed bookings and by bookings still in flight
    #[must_use]
    pub fn issued_pnrs(&self) -> usize {
        self.pnrs.len()
    }

    /// Stop accepting work; queued operations still drain
    pub fn shutdown(&self) {
        self.coordinator.shutdown();
    }
}
