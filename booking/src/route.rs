//! Route resolution: where on a train's timetable a journey starts and ends.

use crate::error::BookingError;
use crate::types::{StationCode, Train};

/// A resolved boarding/alighting pair on one train's route.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Journey {
    /// Index of the boarding stop
    pub from_index: usize,
    /// Index of the alighting stop, strictly after `from_index`
    pub to_index: usize,
    /// Distance travelled in distance units
    pub distance: u32,
}

/// Resolve `from -> to` on `train`.
///
/// # Errors
///
/// [`BookingError::InvalidRoute`] when either station is not on the route or
/// `to` does not strictly follow `from`.
pub fn resolve(train: &Train, from: &StationCode, to: &StationCode) -> Result<Journey, BookingError> {
    let invalid = || BookingError::InvalidRoute {
        train_id: train.id.clone(),
        from: from.clone(),
        to: to.clone(),
    };

    let from_index = train.stop_index(from).ok_or_else(invalid)?;
    let to_index = train.stop_index(to).ok_or_else(invalid)?;
    if to_index <= from_index {
        return Err(invalid());
    }

    let distance = train.stops[to_index]
        .distance
        .checked_sub(train.stops[from_index].distance)
        .ok_or_else(invalid)?;

    Ok(Journey {
        from_index,
        to_index,
        distance,
    })
}

/// Distance between two stations on `train`'s route.
///
/// # Errors
///
/// As [`resolve`].
pub fn distance(train: &Train, from: &StationCode, to: &StationCode) -> Result<u32, BookingError> {
    resolve(train, from, to).map(|journey| journey.distance)
}
