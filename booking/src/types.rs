//! Domain types for the train seat reservation engine.
//!
//! This module contains the value objects, entities and schedule types shared by
//! every component: identifiers, money, classes and quotas, passengers, bookings
//! and the train timetable.

use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::iter::Sum;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct BookingId(Uuid);

impl BookingId {
    /// Creates a new random `BookingId`
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a `BookingId` from a `Uuid`
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get the inner UUID
    #[must_use]
    pub const fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for BookingId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Train number, e.g. `12951`
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TrainId(String);

impl TrainId {
    /// Creates a `TrainId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The train number as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TrainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Station code, e.g. `NDLS`. Always upper case.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct StationCode(String);

impl StationCode {
    /// Creates a `StationCode`, normalizing to upper case
    #[must_use]
    pub fn new(code: impl AsRef<str>) -> Self {
        Self(code.as_ref().trim().to_ascii_uppercase())
    }

    /// The code as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to the account that made a booking.
///
/// Identity itself is managed outside this crate.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserId(String);

impl UserId {
    /// Creates a `UserId`
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The id as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Passenger Name Record: the 10-digit public handle of a booking
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pnr(String);

impl Pnr {
    /// Number of digits in a PNR
    pub const LEN: usize = 10;

    /// Parse a PNR, accepting exactly ten ASCII digits
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        (text.len() == Self::LEN && text.bytes().all(|b| b.is_ascii_digit()))
            .then(|| Self(text.to_string()))
    }

    /// Build a PNR from a number below 10^10, zero-padded
    #[must_use]
    pub(crate) fn from_number(number: u64) -> Self {
        Self(format!("{:010}", number % 10_000_000_000))
    }

    /// The PNR as text
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pnr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ============================================================================
// Money Value Object (minor units to avoid floating point errors)
// ============================================================================

/// An amount of money in minor units (paise), two implied decimals
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(u64);

impl Money {
    /// Zero
    pub const ZERO: Self = Self(0);

    /// Creates a `Money` value from minor units
    #[must_use]
    pub const fn from_minor(minor: u64) -> Self {
        Self(minor)
    }

    /// Creates a `Money` value from whole and fractional parts, e.g. `(620, 0)`
    ///
    /// Saturates instead of overflowing.
    #[must_use]
    pub const fn new(major: u64, minor: u64) -> Self {
        Self(major.saturating_mul(100).saturating_add(minor))
    }

    /// Returns the amount in minor units
    #[must_use]
    pub const fn minor(&self) -> u64 {
        self.0
    }

    /// Checks if the amount is zero
    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.0 == 0
    }

    /// Adds two amounts, saturating at the maximum
    #[must_use]
    pub const fn saturating_add(self, other: Self) -> Self {
        Self(self.0.saturating_add(other.0))
    }

    /// Subtracts, saturating at zero
    #[must_use]
    pub const fn saturating_sub(self, other: Self) -> Self {
        Self(self.0.saturating_sub(other.0))
    }

    /// Multiplies by a quantity, saturating at the maximum
    #[must_use]
    pub const fn saturating_mul(self, quantity: u64) -> Self {
        Self(self.0.saturating_mul(quantity))
    }

    /// `percent`% of this amount, rounded half-up to the minor unit
    #[must_use]
    pub const fn percent(self, percent: u32) -> Self {
        let scaled = (self.0 as u128) * (percent as u128) + 50;
        let value = scaled / 100;
        if value > u64::MAX as u128 {
            Self(u64::MAX)
        } else {
            #[allow(clippy::cast_possible_truncation)]
            Self(value as u64)
        }
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::ZERO, Self::saturating_add)
    }
}

// ============================================================================
// Travel Classes and Berths
// ============================================================================

/// Berth or seat position inside a coach
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BerthType {
    /// Lower berth
    Lower,
    /// Middle berth, or the middle seat of a row
    Middle,
    /// Upper berth
    Upper,
    /// Side lower berth
    SideLower,
    /// Side upper berth
    SideUpper,
    /// Window seat
    Window,
    /// Aisle seat
    Aisle,
}

impl fmt::Display for BerthType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Lower => "LB",
            Self::Middle => "MB",
            Self::Upper => "UB",
            Self::SideLower => "SL",
            Self::SideUpper => "SU",
            Self::Window => "WS",
            Self::Aisle => "AS",
        };
        f.write_str(label)
    }
}

const TWO_TIER: &[BerthType] = &[BerthType::Lower, BerthType::Upper];
const TWO_TIER_SIDE: &[BerthType] = &[
    BerthType::Lower,
    BerthType::Upper,
    BerthType::Lower,
    BerthType::Upper,
    BerthType::SideLower,
    BerthType::SideUpper,
];
const THREE_TIER: &[BerthType] = &[
    BerthType::Lower,
    BerthType::Middle,
    BerthType::Upper,
    BerthType::Lower,
    BerthType::Middle,
    BerthType::Upper,
    BerthType::SideLower,
    BerthType::SideUpper,
];
const FIVE_ACROSS: &[BerthType] = &[
    BerthType::Window,
    BerthType::Middle,
    BerthType::Aisle,
    BerthType::Aisle,
    BerthType::Window,
];
const FOUR_ACROSS: &[BerthType] = &[
    BerthType::Window,
    BerthType::Aisle,
    BerthType::Aisle,
    BerthType::Window,
];
const SIX_ACROSS: &[BerthType] = &[
    BerthType::Window,
    BerthType::Middle,
    BerthType::Aisle,
    BerthType::Aisle,
    BerthType::Middle,
    BerthType::Window,
];

/// Travel class
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ClassType {
    /// First AC
    #[serde(rename = "AC1A")]
    Ac1A,
    /// AC two tier
    #[serde(rename = "AC2A")]
    Ac2A,
    /// AC three tier
    #[serde(rename = "AC3A")]
    Ac3A,
    /// Sleeper
    #[serde(rename = "SL")]
    Sleeper,
    /// AC chair car
    #[serde(rename = "CC")]
    ChairCar,
    /// Executive chair car
    #[serde(rename = "EC")]
    ExecutiveChair,
    /// First class (non-AC)
    #[serde(rename = "FC")]
    FirstClass,
    /// Second sitting
    #[serde(rename = "2S")]
    SecondSitting,
}

impl ClassType {
    /// Every class, in fare order
    pub const ALL: [Self; 8] = [
        Self::Ac1A,
        Self::Ac2A,
        Self::Ac3A,
        Self::Sleeper,
        Self::ChairCar,
        Self::ExecutiveChair,
        Self::FirstClass,
        Self::SecondSitting,
    ];

    /// The short code used on tickets
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Ac1A => "AC1A",
            Self::Ac2A => "AC2A",
            Self::Ac3A => "AC3A",
            Self::Sleeper => "SL",
            Self::ChairCar => "CC",
            Self::ExecutiveChair => "EC",
            Self::FirstClass => "FC",
            Self::SecondSitting => "2S",
        }
    }

    /// Berths (or seats) per coach
    #[must_use]
    pub const fn berths_per_coach(self) -> u32 {
        match self {
            Self::Ac1A => 24,
            Self::Ac2A => 48,
            Self::Ac3A => 64,
            Self::Sleeper => 72,
            Self::ChairCar => 78,
            Self::ExecutiveChair => 56,
            Self::FirstClass => 26,
            Self::SecondSitting => 108,
        }
    }

    /// Letter prefixed to the coach number, e.g. `B` in `B2`
    #[must_use]
    pub const fn coach_prefix(self) -> char {
        match self {
            Self::Ac1A => 'H',
            Self::Ac2A => 'A',
            Self::Ac3A => 'B',
            Self::Sleeper => 'S',
            Self::ChairCar => 'C',
            Self::ExecutiveChair => 'E',
            Self::FirstClass => 'F',
            Self::SecondSitting => 'D',
        }
    }

    /// Repeating berth pattern along a coach, starting at seat 1
    #[must_use]
    pub const fn berth_cycle(self) -> &'static [BerthType] {
        match self {
            Self::Ac1A | Self::FirstClass => TWO_TIER,
            Self::Ac2A => TWO_TIER_SIDE,
            Self::Ac3A | Self::Sleeper => THREE_TIER,
            Self::ChairCar => FIVE_ACROSS,
            Self::ExecutiveChair => FOUR_ACROSS,
            Self::SecondSitting => SIX_ACROSS,
        }
    }

    /// Coach label, seat number and berth type for a zero-based seat index
    #[must_use]
    pub fn locate(self, seat_index: u32) -> (String, u32, BerthType) {
        let per_coach = self.berths_per_coach();
        let coach = seat_index / per_coach + 1;
        let seat_number = seat_index % per_coach + 1;
        let cycle = self.berth_cycle();
        let berth = cycle[(seat_number as usize - 1) % cycle.len()];
        (format!("{}{coach}", self.coach_prefix()), seat_number, berth)
    }
}

impl fmt::Display for ClassType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for ClassType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        Self::ALL
            .into_iter()
            .find(|class| class.code() == wanted)
            .ok_or_else(|| format!("unknown class: {s}"))
    }
}

// ============================================================================
// Quotas
// ============================================================================

/// Reserved pool of seats within a class
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Quota {
    /// Open to everyone
    General,
    /// Last-minute premium pool, no fallback
    Tatkal,
    /// Reserved for women travellers
    Ladies,
    /// Reserved for senior citizens
    SeniorCitizen,
    /// Reserved for passengers with disabilities
    PhysicallyHandicapped,
    /// Reserved for defence personnel
    Defence,
    /// Reserved for railway staff
    RailwayEmployee,
}

impl Quota {
    /// Every quota
    pub const ALL: [Self; 7] = [
        Self::General,
        Self::Tatkal,
        Self::Ladies,
        Self::SeniorCitizen,
        Self::PhysicallyHandicapped,
        Self::Defence,
        Self::RailwayEmployee,
    ];

    /// The short code used on tickets
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::General => "GN",
            Self::Tatkal => "TQ",
            Self::Ladies => "LD",
            Self::SeniorCitizen => "SS",
            Self::PhysicallyHandicapped => "HP",
            Self::Defence => "DF",
            Self::RailwayEmployee => "RE",
        }
    }

    /// The metric / environment-variable friendly name
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::General => "GENERAL",
            Self::Tatkal => "TATKAL",
            Self::Ladies => "LADIES",
            Self::SeniorCitizen => "SENIOR_CITIZEN",
            Self::PhysicallyHandicapped => "PHYSICALLY_HANDICAPPED",
            Self::Defence => "DEFENCE",
            Self::RailwayEmployee => "RAILWAY_EMPLOYEE",
        }
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Passengers
// ============================================================================

/// Passenger gender
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gender {
    /// Male
    #[serde(rename = "M")]
    Male,
    /// Female
    #[serde(rename = "F")]
    Female,
    /// Transgender
    #[serde(rename = "T")]
    Transgender,
}

/// Fare category derived from a passenger's age
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PassengerCategory {
    /// 12 to 59
    Adult,
    /// 60 and over
    SeniorCitizen,
    /// 5 to 11
    Child,
    /// Under 5: travels free on a lap, occupies no seat
    Infant,
}

impl PassengerCategory {
    /// Age at which the senior concession starts
    pub const SENIOR_AGE: u8 = 60;
    /// Lowest age charged a child fare
    pub const CHILD_MIN_AGE: u8 = 5;
    /// Highest age charged a child fare
    pub const CHILD_MAX_AGE: u8 = 11;

    /// Category for an age in years
    #[must_use]
    pub const fn from_age(age: u8) -> Self {
        if age < Self::CHILD_MIN_AGE {
            Self::Infant
        } else if age <= Self::CHILD_MAX_AGE {
            Self::Child
        } else if age >= Self::SENIOR_AGE {
            Self::SeniorCitizen
        } else {
            Self::Adult
        }
    }
}

impl fmt::Display for PassengerCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Adult => "ADULT",
            Self::SeniorCitizen => "SENIOR_CITIZEN",
            Self::Child => "CHILD",
            Self::Infant => "INFANT",
        };
        f.write_str(label)
    }
}

/// A traveller on a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passenger {
    /// Full name
    pub name: String,
    /// Age in years
    age: u8,
    /// Gender
    pub gender: Gender,
    /// Preferred berth, honoured when a matching berth is free
    pub berth_preference: Option<BerthType>,
}

impl Passenger {
    /// Creates a passenger
    #[must_use]
    pub fn new(name: impl Into<String>, age: u8, gender: Gender) -> Self {
        Self {
            name: name.into(),
            age,
            gender,
            berth_preference: None,
        }
    }

    /// Sets the berth preference
    #[must_use]
    pub const fn with_berth_preference(mut self, berth: BerthType) -> Self {
        self.berth_preference = Some(berth);
        self
    }

    /// Age in years
    #[must_use]
    pub const fn age(&self) -> u8 {
        self.age
    }

    /// Updates the age; the category follows
    pub fn set_age(&mut self, age: u8) {
        self.age = age;
    }

    /// Fare category for the current age
    #[must_use]
    pub const fn category(&self) -> PassengerCategory {
        PassengerCategory::from_age(self.age)
    }

    /// 60 or over
    #[must_use]
    pub const fn is_senior_citizen(&self) -> bool {
        matches!(self.category(), PassengerCategory::SeniorCitizen)
    }

    /// 5 to 11
    #[must_use]
    pub const fn is_child(&self) -> bool {
        matches!(self.category(), PassengerCategory::Child)
    }

    /// Under 5
    #[must_use]
    pub const fn is_infant(&self) -> bool {
        matches!(self.category(), PassengerCategory::Infant)
    }

    /// Whether the passenger needs a berth of their own
    #[must_use]
    pub const fn occupies_seat(&self) -> bool {
        !self.is_infant()
    }
}

// ============================================================================
// Bookings
// ============================================================================

/// Lifecycle state of a booking
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    /// Holds assigned berths
    Confirmed,
    /// Reservation Against Cancellation: may board, no berth of its own yet
    Rac,
    /// Queued for a seat
    Waitlisted,
    /// Cancelled by the passenger or by chart preparation
    Cancelled,
    /// Frozen by chart preparation
    ChartPrepared,
}

impl BookingStatus {
    /// Whether no further transition is possible
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Cancelled | Self::ChartPrepared)
    }

    /// Whether the booking is parked in an RAC or waitlist queue
    #[must_use]
    pub const fn is_queued(self) -> bool {
        matches!(self, Self::Rac | Self::Waitlisted)
    }

    /// Metric / log label
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Confirmed => "CONFIRMED",
            Self::Rac => "RAC",
            Self::Waitlisted => "WAITLISTED",
            Self::Cancelled => "CANCELLED",
            Self::ChartPrepared => "CHART_PREPARED",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A berth assigned to one passenger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeatAllocation {
    /// Position of the passenger in the booking
    pub passenger_index: usize,
    /// Passenger name, for the ticket
    pub passenger_name: String,
    /// Coach label, e.g. `B2`
    pub coach: String,
    /// Seat number within the coach, starting at 1
    pub seat_number: u32,
    /// Berth type at that seat
    pub berth_type: BerthType,
    /// Zero-based seat index within the class
    pub seat_index: u32,
}

/// Fare for one passenger
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareLine {
    /// Position of the passenger in the booking
    pub passenger_index: usize,
    /// Category the fare was computed for
    pub category: PassengerCategory,
    /// Undiscounted fare (distance × class rate)
    pub base: Money,
    /// Amount knocked off by the category concession
    pub concession: Money,
    /// What the passenger pays
    pub amount: Money,
}

/// Itemised fare of a booking
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FareBreakdown {
    /// Journey distance in distance units
    pub distance: u32,
    /// One line per passenger, in booking order
    pub lines: Vec<FareLine>,
    /// Sum of undiscounted lines
    pub base_fare: Money,
    /// Sum of concessions
    pub concession: Money,
    /// Flat per-booking fee
    pub convenience_fee: Money,
    /// Amount charged: discounted lines plus the fee
    pub total: Money,
}

/// Why a booking was cancelled
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CancellationReason {
    /// The passenger asked for it
    PassengerRequested,
    /// Still waitlisted when the chart was prepared
    AutoCancelledWaitlist,
}

/// Settlement recorded when a booking is cancelled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancellationInfo {
    /// When the cancellation was applied
    pub cancelled_at: DateTime<Utc>,
    /// Amount retained
    pub charge: Money,
    /// Amount returned
    pub refund: Money,
    /// Why the booking was cancelled
    pub reason: CancellationReason,
    /// Status the booking held before cancellation
    pub previous_status: BookingStatus,
}

/// The unit of serialization: one class of one train on one date
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShardKey {
    /// Train
    pub train_id: TrainId,
    /// Date the train leaves its origin
    pub travel_date: NaiveDate,
    /// Class
    pub class: ClassType,
}

impl ShardKey {
    /// Creates a shard key
    #[must_use]
    pub const fn new(train_id: TrainId, travel_date: NaiveDate, class: ClassType) -> Self {
        Self {
            train_id,
            travel_date,
            class,
        }
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.train_id, self.travel_date, self.class)
    }
}

/// A reservation for one or more passengers on one train, date and class
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    /// Internal id
    pub id: BookingId,
    /// Public handle
    pub pnr: Pnr,
    /// Account that made the booking, if any
    pub user_id: Option<UserId>,
    /// Train
    pub train_id: TrainId,
    /// Boarding station
    pub source: StationCode,
    /// Alighting station
    pub destination: StationCode,
    /// Date the train leaves its origin
    pub travel_date: NaiveDate,
    /// Class
    pub class: ClassType,
    /// Quota asked for
    pub requested_quota: Quota,
    /// Quota whose record holds the booking (GENERAL after a fallback)
    pub allocated_quota: Quota,
    /// Lifecycle state
    pub status: BookingStatus,
    /// Travellers
    pub passengers: Vec<Passenger>,
    /// Berths, only while `Confirmed` or `ChartPrepared`
    pub seat_allocations: Vec<SeatAllocation>,
    /// Fare charged at booking time
    pub fare: FareBreakdown,
    /// Settlement, once cancelled
    pub cancellation: Option<CancellationInfo>,
    /// Scheduled departure from the boarding station
    pub departure_at: DateTime<Utc>,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Last transition time
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// The shard this booking lives in
    #[must_use]
    pub fn shard_key(&self) -> ShardKey {
        ShardKey::new(self.train_id.clone(), self.travel_date, self.class)
    }

    /// Passengers that occupy a seat (everyone but infants)
    #[must_use]
    pub fn seats_required(&self) -> u32 {
        seats_required(&self.passengers)
    }

    /// Whether a passenger-requested cancellation is possible right now
    ///
    /// `ChartPrepared` bookings are only cancellable when policy allows it,
    /// which this method does not know about.
    #[must_use]
    pub const fn is_cancellable(&self) -> bool {
        matches!(
            self.status,
            BookingStatus::Confirmed | BookingStatus::Rac | BookingStatus::Waitlisted
        )
    }

    /// Whether a cancellation returned money
    #[must_use]
    pub fn is_refunded(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(|info| !info.refund.is_zero())
    }
}

/// Number of seat-occupying passengers
#[must_use]
pub fn seats_required(passengers: &[Passenger]) -> u32 {
    let count = passengers.iter().filter(|p| p.occupies_seat()).count();
    u32::try_from(count).unwrap_or(u32::MAX)
}

// ============================================================================
// Train Schedule
// ============================================================================

/// A halt on a train's route
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stop {
    /// Station
    pub station: StationCode,
    /// Local arrival time, `None` at the origin
    pub arrival: Option<NaiveTime>,
    /// Local departure time, `None` at the terminus
    pub departure: Option<NaiveTime>,
    /// Days after the origin date this halt happens on
    pub day_offset: u32,
    /// Cumulative distance from the origin
    pub distance: u32,
}

impl Stop {
    /// Creates a stop
    #[must_use]
    pub fn new(
        station: impl AsRef<str>,
        arrival: Option<NaiveTime>,
        departure: Option<NaiveTime>,
        day_offset: u32,
        distance: u32,
    ) -> Self {
        Self {
            station: StationCode::new(station),
            arrival,
            departure,
            day_offset,
            distance,
        }
    }
}

/// Capacity and rate of one class on a train
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassConfig {
    /// Total seats in the class
    pub capacity: u32,
    /// Fare per distance unit
    pub base_fare_per_unit: Money,
}

impl ClassConfig {
    /// Creates a class configuration
    #[must_use]
    pub const fn new(capacity: u32, base_fare_per_unit: Money) -> Self {
        Self {
            capacity,
            base_fare_per_unit,
        }
    }
}

/// A scheduled train. Immutable as far as this crate is concerned.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Train {
    /// Train number
    pub id: TrainId,
    /// Display name
    pub name: String,
    /// Halts in route order, cumulative distances non-decreasing
    pub stops: Vec<Stop>,
    /// Weekdays the train leaves its origin
    pub operating_days: Vec<Weekday>,
    /// Classes offered
    pub classes: BTreeMap<ClassType, ClassConfig>,
    /// Offset of the timetable's local time from UTC, in minutes
    pub utc_offset_minutes: i32,
    /// Inactive trains accept no bookings
    pub active: bool,
}

impl Train {
    /// Creates an active train running every day, with no stops or classes yet
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: TrainId::new(id),
            name: name.into(),
            stops: Vec::new(),
            operating_days: vec![
                Weekday::Mon,
                Weekday::Tue,
                Weekday::Wed,
                Weekday::Thu,
                Weekday::Fri,
                Weekday::Sat,
                Weekday::Sun,
            ],
            classes: BTreeMap::new(),
            utc_offset_minutes: 0,
            active: true,
        }
    }

    /// Appends a stop
    #[must_use]
    pub fn with_stop(mut self, stop: Stop) -> Self {
        self.stops.push(stop);
        self
    }

    /// Offers a class
    #[must_use]
    pub fn with_class(mut self, class: ClassType, config: ClassConfig) -> Self {
        self.classes.insert(class, config);
        self
    }

    /// Restricts the weekdays the train runs
    #[must_use]
    pub fn operating_on(mut self, days: impl IntoIterator<Item = Weekday>) -> Self {
        self.operating_days = days.into_iter().collect();
        self
    }

    /// Sets the timetable's UTC offset
    #[must_use]
    pub const fn with_utc_offset_minutes(mut self, minutes: i32) -> Self {
        self.utc_offset_minutes = minutes;
        self
    }

    /// Position of a station on the route
    #[must_use]
    pub fn stop_index(&self, station: &StationCode) -> Option<usize> {
        self.stops.iter().position(|stop| &stop.station == station)
    }

    /// Whether the train leaves its origin on `date`
    #[must_use]
    pub fn operates_on(&self, date: NaiveDate) -> bool {
        self.operating_days.contains(&date.weekday())
    }

    /// Configuration of a class, if offered
    #[must_use]
    pub fn class(&self, class: ClassType) -> Option<&ClassConfig> {
        self.classes.get(&class)
    }

    /// Absolute departure time from the stop at `stop_index` for a train
    /// leaving its origin on `travel_date`
    ///
    /// Falls back to the arrival time for a halt without a departure time.
    #[must_use]
    pub fn departure_at(&self, travel_date: NaiveDate, stop_index: usize) -> Option<DateTime<Utc>> {
        let stop = self.stops.get(stop_index)?;
        let time = stop.departure.or(stop.arrival)?;
        let date = travel_date.checked_add_signed(Duration::days(i64::from(stop.day_offset)))?;
        let offset = FixedOffset::east_opt(self.utc_offset_minutes.checked_mul(60)?)?;
        offset
            .from_local_datetime(&date.and_time(time))
            .single()
            .map(|local| local.with_timezone(&Utc))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_pnr_parse_requires_ten_digits() {
        assert!(Pnr::parse("1234567890").is_some());
        assert!(Pnr::parse("123456789").is_none());
        assert!(Pnr::parse("12345678901").is_none());
        assert!(Pnr::parse("12345abcde").is_none());
        assert_eq!(Pnr::from_number(42).as_str(), "0000000042");
    }

    #[test]
    fn test_money_percent_rounds_half_up() {
        assert_eq!(Money::from_minor(101).percent(50), Money::from_minor(51));
        assert_eq!(Money::from_minor(100_000).percent(60), Money::from_minor(60_000));
        assert_eq!(Money::from_minor(3).percent(25), Money::from_minor(1));
        assert_eq!(Money::new(620, 0).to_string(), "620.00");
        assert_eq!(Money::from_minor(5).to_string(), "0.05");
    }

    #[test]
    fn test_money_sum_and_saturation() {
        let total: Money = [Money::new(1, 50), Money::new(2, 50)].into_iter().sum();
        assert_eq!(total, Money::new(4, 0));
        assert_eq!(Money::new(1, 0).saturating_sub(Money::new(2, 0)), Money::ZERO);
    }

    #[test]
    fn test_passenger_category_boundaries() {
        assert_eq!(PassengerCategory::from_age(0), PassengerCategory::Infant);
        assert_eq!(PassengerCategory::from_age(4), PassengerCategory::Infant);
        assert_eq!(PassengerCategory::from_age(5), PassengerCategory::Child);
        assert_eq!(PassengerCategory::from_age(11), PassengerCategory::Child);
        assert_eq!(PassengerCategory::from_age(12), PassengerCategory::Adult);
        assert_eq!(PassengerCategory::from_age(59), PassengerCategory::Adult);
        assert_eq!(PassengerCategory::from_age(60), PassengerCategory::SeniorCitizen);
    }

    #[test]
    fn test_set_age_updates_derived_flags() {
        let mut passenger = Passenger::new("Asha", 30, Gender::Female);
        assert!(!passenger.is_senior_citizen());

        passenger.set_age(65);
        assert!(passenger.is_senior_citizen());

        passenger.set_age(3);
        assert!(passenger.is_infant());
        assert!(!passenger.occupies_seat());
    }

    #[test]
    fn test_class_locate_maps_coach_and_berth() {
        assert_eq!(
            ClassType::Ac3A.locate(0),
            ("B1".to_string(), 1, BerthType::Lower)
        );
        assert_eq!(
            ClassType::Ac3A.locate(6),
            ("B1".to_string(), 7, BerthType::SideLower)
        );
        assert_eq!(
            ClassType::Ac3A.locate(64),
            ("B2".to_string(), 1, BerthType::Lower)
        );
        assert_eq!(
            ClassType::SecondSitting.locate(0),
            ("D1".to_string(), 1, BerthType::Window)
        );
    }

    #[test]
    fn test_class_codes_round_trip_through_from_str() {
        for class in ClassType::ALL {
            assert_eq!(class.code().parse::<ClassType>().unwrap(), class);
        }
        assert!("XX".parse::<ClassType>().is_err());
        assert_eq!(
            serde_json::to_string(&ClassType::SecondSitting).unwrap(),
            "\"2S\""
        );
    }

    #[test]
    fn test_departure_applies_day_offset_and_utc_offset() {
        let train = Train::new("12951", "Rajdhani")
            .with_utc_offset_minutes(330)
            .with_stop(Stop::new(
                "MMCT",
                None,
                NaiveTime::from_hms_opt(17, 0, 0),
                0,
                0,
            ))
            .with_stop(Stop::new(
                "NDLS",
                NaiveTime::from_hms_opt(8, 30, 0),
                NaiveTime::from_hms_opt(8, 45, 0),
                1,
                1384,
            ));
        let date = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();

        let origin = train.departure_at(date, 0).unwrap();
        assert_eq!(origin.to_rfc3339(), "2025-03-01T11:30:00+00:00");

        let next_day = train.departure_at(date, 1).unwrap();
        assert_eq!(next_day.to_rfc3339(), "2025-03-02T03:15:00+00:00");
    }

    #[test]
    fn test_operating_days_filter_dates() {
        let train = Train::new("1", "Weekender").operating_on([Weekday::Sat, Weekday::Sun]);
        let saturday = NaiveDate::from_ymd_opt(2025, 3, 1).unwrap();
        let monday = NaiveDate::from_ymd_opt(2025, 3, 3).unwrap();
        assert!(train.operates_on(saturday));
        assert!(!train.operates_on(monday));
    }
}
