use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use marquee_core::models::{
    holds_seats, Booking, BookingHistoryEntry, BookingStatus, Id, IssuedTicket, NewBooking, Recipient, Seat,
    SeatClaim, ScreeningDetails, ScreeningWindow, Ticket, TicketContext, TicketView,
};
use marquee_core::payment::{NewPayment, Payment, PaymentMethod, PaymentStatus};
use marquee_core::{ReservationStore, StoreError, StoreResult, StoreTx};

/// In-process [`ReservationStore`] for tests and local runs without Postgres.
///
/// A transaction takes the whole-store lock and works on a private copy of the
/// state. Commit swaps the copy in; dropping the handle discards it. Concurrent
/// writers therefore block on each other the way row locks make them block in
/// Postgres, only at a coarser grain.
///
/// Read methods also take the lock, so a task must not call them while it holds
/// an open transaction from the same store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
    fail_ticket_inserts: Arc<AtomicBool>,
}

#[derive(Clone, Default)]
struct State {
    next_id: Id,
    users: HashMap<Id, Recipient>,
    screenings: HashMap<Id, ScreeningRecord>,
    seats: BTreeMap<Id, Seat>,
    payment_methods: BTreeMap<Id, PaymentMethod>,
    bookings: BTreeMap<Id, Booking>,
    booking_seats: Vec<BookingSeat>,
    payments: BTreeMap<Id, Payment>,
    tickets: BTreeMap<Id, Ticket>,
}

impl State {
    fn next_id(&mut self) -> Id {
        self.next_id += 1;
        self.next_id
    }

    fn live_window(&self, screening_id: Id) -> Option<ScreeningWindow> {
        self.screenings
            .get(&screening_id)
            .filter(|s| !s.deleted)
            .map(|s| s.window.clone())
    }

    fn seat_held_elsewhere(&self, screening_id: Id, seat_id: Id, booking_id: Id, now: DateTime<Utc>) -> bool {
        self.booking_seats
            .iter()
            .filter(|bs| bs.screening_id == screening_id && bs.seat_id == seat_id && bs.booking_id != booking_id)
            .filter_map(|bs| self.bookings.get(&bs.booking_id))
            .any(|b| b.holds_seats(now))
    }

    fn seat_code(&self, seat_id: Id) -> String {
        self.seats
            .get(&seat_id)
            .map(|s| s.code.clone())
            .unwrap_or_default()
    }
}

#[derive(Clone)]
struct ScreeningRecord {
    window: ScreeningWindow,
    details: ScreeningDetails,
    deleted: bool,
}

#[derive(Clone)]
struct BookingSeat {
    booking_id: Id,
    screening_id: Id,
    seat_id: Id,
    status: BookingStatus,
}

/// Catalog rows for one screening in a fresh studio.
#[derive(Debug, Clone)]
pub struct ScreeningFixture {
    pub movie_title: String,
    pub cinema_name: String,
    pub studio_name: String,
    pub start_time: DateTime<Utc>,
    pub duration_minutes: i32,
    pub seat_codes: Vec<String>,
}

impl ScreeningFixture {
    pub fn new(start_time: DateTime<Utc>, duration_minutes: i32) -> Self {
        Self {
            movie_title: "Untitled".to_string(),
            cinema_name: "Marquee Central".to_string(),
            studio_name: "Studio 1".to_string(),
            start_time,
            duration_minutes,
            seat_codes: Vec::new(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.movie_title = title.into();
        self
    }

    pub fn with_seats<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.seat_codes = codes.into_iter().map(Into::into).collect();
        self
    }
}

/// Ids assigned when a [`ScreeningFixture`] is seeded.
#[derive(Debug, Clone)]
pub struct SeededScreening {
    pub screening_id: Id,
    pub studio_id: Id,
    pub seat_ids: Vec<Id>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn add_user(&self, name: &str, email: &str) -> Id {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.users.insert(
            id,
            Recipient {
                user_id: id,
                name: name.to_string(),
                email: email.to_string(),
            },
        );
        id
    }

    pub async fn add_payment_method(&self, name: &str) -> Id {
        let mut state = self.state.lock().await;
        let id = state.next_id();
        state.payment_methods.insert(
            id,
            PaymentMethod {
                id,
                name: name.to_string(),
            },
        );
        id
    }

    pub async fn add_screening(&self, fixture: ScreeningFixture) -> SeededScreening {
        let mut state = self.state.lock().await;
        let studio_id = state.next_id();
        let movie_id = state.next_id();
        let screening_id = state.next_id();

        let seat_ids = fixture
            .seat_codes
            .iter()
            .map(|code| {
                let id = state.next_id();
                state.seats.insert(
                    id,
                    Seat {
                        id,
                        studio_id,
                        code: code.clone(),
                    },
                );
                id
            })
            .collect();

        state.screenings.insert(
            screening_id,
            ScreeningRecord {
                window: ScreeningWindow {
                    screening_id,
                    studio_id,
                    movie_id,
                    start_time: fixture.start_time,
                    duration_minutes: fixture.duration_minutes,
                },
                details: ScreeningDetails {
                    screening_id,
                    movie_title: fixture.movie_title,
                    cinema_name: fixture.cinema_name,
                    studio_name: fixture.studio_name,
                    start_time: fixture.start_time,
                },
                deleted: false,
            },
        );

        SeededScreening {
            screening_id,
            studio_id,
            seat_ids,
        }
    }

    /// Soft-deletes a screening the way the catalog service does.
    pub async fn delete_screening(&self, screening_id: Id) {
        if let Some(record) = self.state.lock().await.screenings.get_mut(&screening_id) {
            record.deleted = true;
        }
    }

    /// Administrative status override, bypassing the reservation flow.
    pub async fn set_booking_status(&self, booking_id: Id, status: BookingStatus) {
        let mut state = self.state.lock().await;
        if let Some(booking) = state.bookings.get_mut(&booking_id) {
            booking.status = status;
        }
        for bs in state.booking_seats.iter_mut().filter(|bs| bs.booking_id == booking_id) {
            bs.status = status;
        }
    }

    /// Makes every later `insert_ticket` fail until switched off again, including
    /// inserts in a transaction that is already open.
    pub fn fail_ticket_inserts(&self, fail: bool) {
        self.fail_ticket_inserts.store(fail, Ordering::SeqCst);
    }

    pub async fn payments_for_booking(&self, booking_id: Id) -> Vec<Payment> {
        self.state
            .lock()
            .await
            .payments
            .values()
            .filter(|p| p.booking_id == booking_id)
            .cloned()
            .collect()
    }

    pub async fn booking_count(&self) -> usize {
        self.state.lock().await.bookings.len()
    }

    /// Seat ids attached to `booking_id`, in the order they were claimed.
    pub async fn claimed_seat_ids(&self, booking_id: Id) -> Vec<Id> {
        self.state
            .lock()
            .await
            .booking_seats
            .iter()
            .filter(|bs| bs.booking_id == booking_id)
            .map(|bs| bs.seat_id)
            .collect()
    }

    /// Status column of every seat row attached to `booking_id`.
    pub async fn seat_row_statuses(&self, booking_id: Id) -> Vec<BookingStatus> {
        self.state
            .lock()
            .await
            .booking_seats
            .iter()
            .filter(|bs| bs.booking_id == booking_id)
            .map(|bs| bs.status)
            .collect()
    }
}

#[async_trait]
impl ReservationStore for MemoryStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let guard = self.state.clone().lock_owned().await;
        let staged = guard.clone();
        Ok(Box::new(MemoryTx {
            guard,
            staged,
            fail_ticket_inserts: self.fail_ticket_inserts.clone(),
        }))
    }

    async fn screening_window(&self, screening_id: Id) -> StoreResult<Option<ScreeningWindow>> {
        Ok(self.state.lock().await.live_window(screening_id))
    }

    async fn list_seats_for_studio(&self, studio_id: Id) -> StoreResult<Vec<Seat>> {
        Ok(self
            .state
            .lock()
            .await
            .seats
            .values()
            .filter(|s| s.studio_id == studio_id)
            .cloned()
            .collect())
    }

    async fn held_seat_ids(&self, screening_id: Id, now: DateTime<Utc>) -> StoreResult<HashSet<Id>> {
        let state = self.state.lock().await;
        Ok(state
            .booking_seats
            .iter()
            .filter(|bs| bs.screening_id == screening_id)
            .filter(|bs| {
                state
                    .bookings
                    .get(&bs.booking_id)
                    .is_some_and(|b| holds_seats(b.status, b.expired_at, now))
            })
            .map(|bs| bs.seat_id)
            .collect())
    }

    async fn booking_with_seats(&self, booking_id: Id) -> StoreResult<Option<(Booking, Vec<Seat>)>> {
        let state = self.state.lock().await;
        let Some(booking) = state.bookings.get(&booking_id).cloned() else {
            return Ok(None);
        };
        let mut seats: Vec<Seat> = state
            .booking_seats
            .iter()
            .filter(|bs| bs.booking_id == booking_id)
            .filter_map(|bs| state.seats.get(&bs.seat_id).cloned())
            .collect();
        seats.sort_by_key(|s| s.id);
        Ok(Some((booking, seats)))
    }

    async fn bookings_for_user(&self, user_id: Id, limit: i64, offset: i64) -> StoreResult<Vec<BookingHistoryEntry>> {
        let state = self.state.lock().await;
        let mut entries = Vec::new();
        for booking in state.bookings.values().filter(|b| b.user_id == user_id) {
            let details = state
                .screenings
                .get(&booking.screening_id)
                .map(|s| &s.details)
                .ok_or_else(|| StoreError::Corrupt(format!("booking {} has no screening", booking.id)))?;

            let mut seat_ids: Vec<Id> = state
                .booking_seats
                .iter()
                .filter(|bs| bs.booking_id == booking.id)
                .map(|bs| bs.seat_id)
                .collect();
            seat_ids.sort_unstable();

            entries.push(BookingHistoryEntry {
                booking_id: booking.id,
                screening_id: booking.screening_id,
                movie_title: details.movie_title.clone(),
                cinema_name: details.cinema_name.clone(),
                start_time: details.start_time,
                seat_codes: seat_ids.into_iter().map(|id| state.seat_code(id)).collect(),
                status: booking.status,
                expired_at: booking.expired_at,
                created_at: booking.created_at,
            });
        }

        entries.sort_by(|a, b| {
            b.start_time
                .cmp(&a.start_time)
                .then_with(|| b.booking_id.cmp(&a.booking_id))
        });
        let skip = usize::try_from(offset).unwrap_or(0);
        let take = usize::try_from(limit).unwrap_or(0);
        Ok(entries.into_iter().skip(skip).take(take).collect())
    }

    async fn count_bookings_for_user(&self, user_id: Id) -> StoreResult<i64> {
        let count = self
            .state
            .lock()
            .await
            .bookings
            .values()
            .filter(|b| b.user_id == user_id)
            .count();
        i64::try_from(count).map_err(|e| StoreError::Corrupt(e.to_string()))
    }

    async fn payment(&self, payment_id: Id) -> StoreResult<Option<Payment>> {
        Ok(self.state.lock().await.payments.get(&payment_id).cloned())
    }

    async fn payment_methods(&self) -> StoreResult<Vec<PaymentMethod>> {
        Ok(self.state.lock().await.payment_methods.values().cloned().collect())
    }

    async fn tickets_for_booking(&self, booking_id: Id) -> StoreResult<Vec<Ticket>> {
        Ok(self
            .state
            .lock()
            .await
            .tickets
            .values()
            .filter(|t| t.booking_id == booking_id)
            .cloned()
            .collect())
    }

    async fn ticket_by_token(&self, qr_token: Uuid) -> StoreResult<Option<TicketView>> {
        let state = self.state.lock().await;
        let Some(ticket) = state.tickets.values().find(|t| t.qr_token == qr_token) else {
            return Ok(None);
        };
        let screening = state
            .bookings
            .get(&ticket.booking_id)
            .and_then(|b| state.screenings.get(&b.screening_id))
            .map(|s| s.details.clone())
            .ok_or_else(|| StoreError::Corrupt(format!("ticket {} has no screening", ticket.id)))?;

        Ok(Some(TicketView {
            ticket_id: ticket.id,
            booking_id: ticket.booking_id,
            seat_code: state.seat_code(ticket.seat_id),
            screening,
            issued_at: ticket.issued_at,
        }))
    }

    async fn ticket_context(&self, booking_id: Id) -> StoreResult<Option<TicketContext>> {
        let state = self.state.lock().await;
        let Some(booking) = state.bookings.get(&booking_id) else {
            return Ok(None);
        };
        let recipient = state
            .users
            .get(&booking.user_id)
            .cloned()
            .ok_or_else(|| StoreError::Corrupt(format!("booking {booking_id} has no user")))?;
        let screening = state
            .screenings
            .get(&booking.screening_id)
            .map(|s| s.details.clone())
            .ok_or_else(|| StoreError::Corrupt(format!("booking {booking_id} has no screening")))?;

        let tickets = state
            .tickets
            .values()
            .filter(|t| t.booking_id == booking_id)
            .map(|t| IssuedTicket {
                seat_code: state.seat_code(t.seat_id),
                qr_token: t.qr_token,
            })
            .collect();

        Ok(Some(TicketContext {
            booking_id,
            recipient,
            screening,
            tickets,
        }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<State>,
    staged: State,
    fail_ticket_inserts: Arc<AtomicBool>,
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn screening_window(&mut self, screening_id: Id) -> StoreResult<Option<ScreeningWindow>> {
        Ok(self.staged.live_window(screening_id))
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<Booking> {
        let id = self.staged.next_id();
        let row = Booking {
            id,
            user_id: booking.user_id,
            screening_id: booking.screening_id,
            status: BookingStatus::Pending,
            expired_at: booking.expired_at,
            created_at: booking.created_at,
            updated_at: booking.created_at,
        };
        self.staged.bookings.insert(id, row.clone());
        Ok(row)
    }

    async fn claim_seat(
        &mut self,
        booking_id: Id,
        screening_id: Id,
        seat_id: Id,
        now: DateTime<Utc>,
    ) -> StoreResult<SeatClaim> {
        let studio_id = self.staged.live_window(screening_id).map(|w| w.studio_id);
        let in_studio = self
            .staged
            .seats
            .get(&seat_id)
            .is_some_and(|s| Some(s.studio_id) == studio_id);
        if !in_studio {
            return Ok(SeatClaim::UnknownSeat);
        }

        if self.staged.seat_held_elsewhere(screening_id, seat_id, booking_id, now) {
            return Ok(SeatClaim::Conflict);
        }

        self.staged.booking_seats.push(BookingSeat {
            booking_id,
            screening_id,
            seat_id,
            status: BookingStatus::Pending,
        });
        Ok(SeatClaim::Claimed)
    }

    async fn lock_booking(&mut self, booking_id: Id) -> StoreResult<Option<Booking>> {
        Ok(self.staged.bookings.get(&booking_id).cloned())
    }

    async fn pending_payment_id(&mut self, booking_id: Id) -> StoreResult<Option<Id>> {
        Ok(self
            .staged
            .payments
            .values()
            .find(|p| p.booking_id == booking_id && p.status == PaymentStatus::Pending)
            .map(|p| p.id))
    }

    async fn payment_method_exists(&mut self, method_id: Id) -> StoreResult<bool> {
        Ok(self.staged.payment_methods.contains_key(&method_id))
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> StoreResult<Id> {
        let id = self.staged.next_id();
        self.staged.payments.insert(
            id,
            Payment {
                id,
                booking_id: payment.booking_id,
                payment_method_id: payment.payment_method_id,
                amount: payment.amount,
                status: PaymentStatus::Pending,
                transaction_id: None,
                created_at: payment.created_at,
                updated_at: payment.created_at,
            },
        );
        Ok(id)
    }

    async fn lock_payment(&mut self, payment_id: Id) -> StoreResult<Option<Payment>> {
        Ok(self.staged.payments.get(&payment_id).cloned())
    }

    async fn settle_payment(
        &mut self,
        payment_id: Id,
        status: PaymentStatus,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        if let Some(payment) = self.staged.payments.get_mut(&payment_id) {
            payment.status = status;
            payment.transaction_id = transaction_id.map(str::to_string);
            payment.updated_at = now;
        }
        Ok(())
    }

    async fn mark_booking_paid(&mut self, booking_id: Id, now: DateTime<Utc>) -> StoreResult<Vec<Id>> {
        if let Some(booking) = self.staged.bookings.get_mut(&booking_id) {
            booking.status = BookingStatus::Paid;
            booking.updated_at = now;
        }
        let mut seat_ids = Vec::new();
        for bs in self.staged.booking_seats.iter_mut().filter(|bs| bs.booking_id == booking_id) {
            bs.status = BookingStatus::Paid;
            seat_ids.push(bs.seat_id);
        }
        Ok(seat_ids)
    }

    async fn insert_ticket(
        &mut self,
        booking_id: Id,
        seat_id: Id,
        qr_token: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        if self.fail_ticket_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::backend("ticket insert rejected"));
        }
        let duplicate = self
            .staged
            .tickets
            .values()
            .any(|t| t.qr_token == qr_token || (t.booking_id == booking_id && t.seat_id == seat_id));
        if duplicate {
            return Err(StoreError::backend("duplicate ticket"));
        }

        let id = self.staged.next_id();
        let ticket = Ticket {
            id,
            booking_id,
            seat_id,
            qr_token,
            issued_at: now,
        };
        self.staged.tickets.insert(id, ticket.clone());
        Ok(ticket)
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryTx { mut guard, staged, .. } = *self;
        *guard = staged;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 0, 0).unwrap()
    }

    async fn seeded() -> (MemoryStore, SeededScreening, Id) {
        let store = MemoryStore::new();
        let user = store.add_user("Jane", "jane@example.com").await;
        let screening = store
            .add_screening(ScreeningFixture::new(t0() + Duration::hours(3), 120).with_seats(["A1", "A2"]))
            .await;
        (store, screening, user)
    }

    fn new_booking(user_id: Id, screening_id: Id) -> NewBooking {
        NewBooking {
            user_id,
            screening_id,
            created_at: t0(),
            expired_at: t0() + Duration::minutes(10),
        }
    }

    #[tokio::test]
    async fn test_dropped_tx_leaves_no_trace() {
        let (store, screening, user) = seeded().await;

        {
            let mut tx = store.begin().await.unwrap();
            let booking = tx.insert_booking(&new_booking(user, screening.screening_id)).await.unwrap();
            let claim = tx
                .claim_seat(booking.id, screening.screening_id, screening.seat_ids[0], t0())
                .await
                .unwrap();
            assert_eq!(claim, SeatClaim::Claimed);
        }

        assert_eq!(store.booking_count().await, 0);
        let held = store.held_seat_ids(screening.screening_id, t0()).await.unwrap();
        assert!(held.is_empty());
    }

    #[tokio::test]
    async fn test_committed_claim_blocks_second_booking_until_expiry() {
        let (store, screening, user) = seeded().await;
        let seat = screening.seat_ids[0];

        let mut tx = store.begin().await.unwrap();
        let first = tx.insert_booking(&new_booking(user, screening.screening_id)).await.unwrap();
        tx.claim_seat(first.id, screening.screening_id, seat, t0()).await.unwrap();
        tx.commit().await.unwrap();

        let mut tx = store.begin().await.unwrap();
        let second = tx.insert_booking(&new_booking(user, screening.screening_id)).await.unwrap();
        let claim = tx.claim_seat(second.id, screening.screening_id, seat, t0()).await.unwrap();
        assert_eq!(claim, SeatClaim::Conflict);

        let later = t0() + Duration::minutes(10);
        let claim = tx.claim_seat(second.id, screening.screening_id, seat, later).await.unwrap();
        assert_eq!(claim, SeatClaim::Claimed);
    }

    #[tokio::test]
    async fn test_seat_from_other_studio_is_unknown() {
        let (store, screening, user) = seeded().await;
        let other = store
            .add_screening(ScreeningFixture::new(t0(), 90).with_seats(["Z9"]))
            .await;

        let mut tx = store.begin().await.unwrap();
        let booking = tx.insert_booking(&new_booking(user, screening.screening_id)).await.unwrap();
        let claim = tx
            .claim_seat(booking.id, screening.screening_id, other.seat_ids[0], t0())
            .await
            .unwrap();
        assert_eq!(claim, SeatClaim::UnknownSeat);
    }

    #[tokio::test]
    async fn test_ticket_fault_applies_to_open_transaction() {
        let (store, screening, user) = seeded().await;

        let mut tx = store.begin().await.unwrap();
        let booking = tx.insert_booking(&new_booking(user, screening.screening_id)).await.unwrap();
        tx.claim_seat(booking.id, screening.screening_id, screening.seat_ids[0], t0())
            .await
            .unwrap();

        store.fail_ticket_inserts(true);
        let seat = screening.seat_ids[0];
        assert!(tx.insert_ticket(booking.id, seat, Uuid::new_v4(), t0()).await.is_err());

        store.fail_ticket_inserts(false);
        assert!(tx.insert_ticket(booking.id, seat, Uuid::new_v4(), t0()).await.is_ok());
    }

    #[tokio::test]
    async fn test_deleted_screening_is_invisible() {
        let (store, screening, _) = seeded().await;
        store.delete_screening(screening.screening_id).await;
        assert!(store.screening_window(screening.screening_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ticket_context_joins_recipient_and_seat_codes() {
        let (store, screening, user) = seeded().await;

        let mut tx = store.begin().await.unwrap();
        let booking = tx.insert_booking(&new_booking(user, screening.screening_id)).await.unwrap();
        for seat in &screening.seat_ids {
            tx.claim_seat(booking.id, screening.screening_id, *seat, t0()).await.unwrap();
        }
        let seat_ids = tx.mark_booking_paid(booking.id, t0()).await.unwrap();
        for seat in seat_ids {
            tx.insert_ticket(booking.id, seat, Uuid::new_v4(), t0()).await.unwrap();
        }
        tx.commit().await.unwrap();

        let ctx = store.ticket_context(booking.id).await.unwrap().unwrap();
        assert_eq!(ctx.recipient.email, "jane@example.com");
        let codes: Vec<_> = ctx.tickets.iter().map(|t| t.seat_code.as_str()).collect();
        assert_eq!(codes, vec!["A1", "A2"]);

        let view = store.ticket_by_token(ctx.tickets[1].qr_token).await.unwrap().unwrap();
        assert_eq!(view.seat_code, "A2");
        assert_eq!(view.booking_id, booking.id);
    }
}
