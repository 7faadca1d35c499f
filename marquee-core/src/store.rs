use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use uuid::Uuid;

use crate::models::{
    Booking, BookingHistoryEntry, Id, NewBooking, Seat, SeatClaim, ScreeningWindow, Ticket, TicketContext, TicketView,
};
use crate::payment::{NewPayment, Payment, PaymentMethod, PaymentStatus};
use crate::StoreResult;

/// Relational storage behind the reservation core.
///
/// Lookups on this trait run outside any transaction and take no locks.
/// Anything that writes goes through [`ReservationStore::begin`].
#[async_trait]
pub trait ReservationStore: Send + Sync {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>>;

    /// Screening lookup. `None` for unknown or soft-deleted screenings.
    async fn screening_window(&self, screening_id: Id) -> StoreResult<Option<ScreeningWindow>>;

    async fn list_seats_for_studio(&self, studio_id: Id) -> StoreResult<Vec<Seat>>;

    /// Seats of `screening_id` referenced by a booking that still holds seats at `now`.
    async fn held_seat_ids(&self, screening_id: Id, now: DateTime<Utc>) -> StoreResult<HashSet<Id>>;

    async fn booking_with_seats(&self, booking_id: Id) -> StoreResult<Option<(Booking, Vec<Seat>)>>;

    /// A user's bookings, latest screening first, then newest booking first.
    async fn bookings_for_user(&self, user_id: Id, limit: i64, offset: i64) -> StoreResult<Vec<BookingHistoryEntry>>;

    async fn count_bookings_for_user(&self, user_id: Id) -> StoreResult<i64>;

    async fn payment(&self, payment_id: Id) -> StoreResult<Option<Payment>>;

    async fn payment_methods(&self) -> StoreResult<Vec<PaymentMethod>>;

    async fn tickets_for_booking(&self, booking_id: Id) -> StoreResult<Vec<Ticket>>;

    async fn ticket_by_token(&self, qr_token: Uuid) -> StoreResult<Option<TicketView>>;

    async fn ticket_context(&self, booking_id: Id) -> StoreResult<Option<TicketContext>>;
}

/// An open transaction.
///
/// Dropping the handle without calling [`StoreTx::commit`] rolls everything back,
/// so `?` and early returns never leave partial state behind. The `lock_*` methods
/// block until the row lock is granted and hold it until commit or rollback.
#[async_trait]
pub trait StoreTx: Send {
    /// Re-reads the screening inside the transaction.
    async fn screening_window(&mut self, screening_id: Id) -> StoreResult<Option<ScreeningWindow>>;

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<Booking>;

    /// Attaches `seat_id` to `booking_id` unless a booking that holds seats at `now`
    /// already references it for the same screening.
    async fn claim_seat(
        &mut self,
        booking_id: Id,
        screening_id: Id,
        seat_id: Id,
        now: DateTime<Utc>,
    ) -> StoreResult<SeatClaim>;

    /// `SELECT ... FOR UPDATE` on the booking row.
    async fn lock_booking(&mut self, booking_id: Id) -> StoreResult<Option<Booking>>;

    async fn pending_payment_id(&mut self, booking_id: Id) -> StoreResult<Option<Id>>;

    async fn payment_method_exists(&mut self, method_id: Id) -> StoreResult<bool>;

    async fn insert_payment(&mut self, payment: &NewPayment) -> StoreResult<Id>;

    /// `SELECT ... FOR UPDATE` on the payment row.
    async fn lock_payment(&mut self, payment_id: Id) -> StoreResult<Option<Payment>>;

    async fn settle_payment(
        &mut self,
        payment_id: Id,
        status: PaymentStatus,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()>;

    /// Marks the booking and every one of its seat rows as paid. Returns the seat ids.
    async fn mark_booking_paid(&mut self, booking_id: Id, now: DateTime<Utc>) -> StoreResult<Vec<Id>>;

    async fn insert_ticket(
        &mut self,
        booking_id: Id,
        seat_id: Id,
        qr_token: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Ticket>;

    async fn commit(self: Box<Self>) -> StoreResult<()>;
}
