//! Train schedule lookup.
//!
//! Timetables are owned by schedule management outside this crate; booking
//! only reads them.

use crate::types::{Train, TrainId};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Read-only access to published timetables.
pub trait ScheduleProvider: Send + Sync {
    /// The train with this number, if published.
    fn train(&self, id: &TrainId) -> Option<Arc<Train>>;
}

/// In-process timetable.
#[derive(Debug, Default)]
pub struct InMemorySchedule {
    trains: RwLock<HashMap<TrainId, Arc<Train>>>,
}

impl InMemorySchedule {
    /// Empty schedule
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish (or replace) a train
    pub fn insert(&self, train: Train) {
        self.trains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(train.id.clone(), Arc::new(train));
    }

    /// Builder form of [`insert`](Self::insert)
    #[must_use]
    pub fn with_train(self, train: Train) -> Self {
        self.insert(train);
        self
    }
}

impl ScheduleProvider for InMemorySchedule {
    fn train(&self, id: &TrainId) -> Option<Arc<Train>> {
        self.trains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }
}
