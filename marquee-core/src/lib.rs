pub mod clock;
pub mod models;
pub mod payment;
pub mod store;
pub mod token;

pub use clock::{Clock, ManualClock, SystemClock};
pub use models::{Booking, BookingStatus, Id, Seat, SeatState, ScreeningWindow};
pub use payment::{Payment, PaymentStatus};
pub use store::{ReservationStore, StoreTx};

/// Reasons a well-formed request is refused. Terminal for the request that hit them;
/// the client may try again with different parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ConflictKind {
    #[error("booking is closed for this screening")]
    BookingClosed,
    #[error("one or more seats already booked")]
    SeatsTaken,
    #[error("booking is already cancelled")]
    BookingCancelled,
    #[error("booking hold has expired")]
    HoldExpired,
    #[error("booking is already paid")]
    AlreadyPaid,
}

#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    Validation(String),
    #[error(transparent)]
    Conflict(#[from] ConflictKind),
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Failure inside a storage backend. The backend error is kept as the source so
/// callers can log it, but it is never shown to end users.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("storage backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
    #[error("corrupt row: {0}")]
    Corrupt(String),
}

impl StoreError {
    pub fn backend<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Backend(err.into())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;
