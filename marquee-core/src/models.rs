use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Row identifier shared by every table.
pub type Id = i64;

#[derive(Debug, thiserror::Error)]
#[error("unknown {kind} status: {value}")]
pub struct ParseStatusError {
    pub kind: &'static str,
    pub value: String,
}

/// Booking status as persisted. Expiry is never written here; see [`holds_seats`].
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BookingStatus {
    Pending,
    Paid,
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Pending => "pending",
            BookingStatus::Paid => "paid",
            BookingStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ParseStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BookingStatus::Pending),
            "paid" => Ok(BookingStatus::Paid),
            "cancelled" => Ok(BookingStatus::Cancelled),
            other => Err(ParseStatusError {
                kind: "booking",
                value: other.to_string(),
            }),
        }
    }
}

/// Whether a booking in `status` with hold deadline `expired_at` still owns its seats at `now`.
///
/// Paid bookings always do, cancelled ones never do, and a pending booking does
/// only until its hold lapses. Nothing rewrites the row when that happens.
pub fn holds_seats(status: BookingStatus, expired_at: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    match status {
        BookingStatus::Paid => true,
        BookingStatus::Pending => now < expired_at,
        BookingStatus::Cancelled => false,
    }
}

/// Status as a reader should interpret it at a given instant.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EffectiveStatus {
    Pending,
    Paid,
    Cancelled,
    Expired,
}

pub fn effective_status(status: BookingStatus, expired_at: DateTime<Utc>, now: DateTime<Utc>) -> EffectiveStatus {
    match status {
        BookingStatus::Paid => EffectiveStatus::Paid,
        BookingStatus::Cancelled => EffectiveStatus::Cancelled,
        BookingStatus::Pending if holds_seats(status, expired_at, now) => EffectiveStatus::Pending,
        BookingStatus::Pending => EffectiveStatus::Expired,
    }
}

/// The part of a screening that decides whether it still takes bookings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreeningWindow {
    pub screening_id: Id,
    pub studio_id: Id,
    pub movie_id: Id,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
}

impl ScreeningWindow {
    pub fn closes_at(&self) -> DateTime<Utc> {
        self.start_time + Duration::minutes(i64::from(self.duration_minutes))
    }

    /// Bookings are accepted strictly before the movie ends.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        now < self.closes_at()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Seat {
    pub id: Id,
    pub studio_id: Id,
    pub code: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SeatState {
    Available,
    Booked,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SeatAvailability {
    pub seat_id: Id,
    pub seat_code: String,
    pub status: SeatState,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Booking {
    pub id: Id,
    pub user_id: Id,
    pub screening_id: Id,
    pub status: BookingStatus,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    pub fn holds_seats(&self, now: DateTime<Utc>) -> bool {
        holds_seats(self.status, self.expired_at, now)
    }

    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        effective_status(self.status, self.expired_at, now)
    }
}

/// One line of a user's booking history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BookingHistoryEntry {
    pub booking_id: Id,
    pub screening_id: Id,
    pub movie_title: String,
    pub cinema_name: String,
    pub start_time: DateTime<Utc>,
    pub seat_codes: Vec<String>,
    pub status: BookingStatus,
    pub expired_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl BookingHistoryEntry {
    pub fn effective_status(&self, now: DateTime<Utc>) -> EffectiveStatus {
        effective_status(self.status, self.expired_at, now)
    }
}

/// Values for a booking row about to be inserted.
#[derive(Debug, Clone)]
pub struct NewBooking {
    pub user_id: Id,
    pub screening_id: Id,
    pub created_at: DateTime<Utc>,
    pub expired_at: DateTime<Utc>,
}

/// Outcome of trying to attach one seat to a booking inside a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeatClaim {
    Claimed,
    /// Another booking that still holds seats already references this seat for the screening.
    Conflict,
    /// The seat does not exist or belongs to a different studio.
    UnknownSeat,
}

/// Issued ticket. Never mutated after insert.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ticket {
    pub id: Id,
    pub booking_id: Id,
    pub seat_id: Id,
    pub qr_token: Uuid,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IssuedTicket {
    pub seat_code: String,
    pub qr_token: Uuid,
}

/// What the entrance gate sees when a QR token is scanned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketView {
    pub ticket_id: Id,
    pub booking_id: Id,
    pub seat_code: String,
    pub screening: ScreeningDetails,
    pub issued_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Recipient {
    pub user_id: Id,
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScreeningDetails {
    pub screening_id: Id,
    pub movie_title: String,
    pub cinema_name: String,
    pub studio_name: String,
    pub start_time: DateTime<Utc>,
}

/// Everything the ticket notification needs, loaded after payment commits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TicketContext {
    pub booking_id: Id,
    pub recipient: Recipient,
    pub screening: ScreeningDetails,
    pub tickets: Vec<IssuedTicket>,
}
