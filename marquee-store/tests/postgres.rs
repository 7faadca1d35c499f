//! Integration tests for the Postgres store. Each test gets a fresh database with
//! the workspace migrations applied; `DATABASE_URL` must point at a server.

use chrono::{DateTime, Duration, TimeZone, Utc};
use futures_util::future::join_all;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;

use marquee_booking::{PaymentTransactionManager, ReservationManager, TicketVerifier};
use marquee_core::models::{BookingStatus, EffectiveStatus, Id};
use marquee_core::payment::PaymentStatus;
use marquee_core::{Clock, ConflictKind, CoreError, ManualClock, ReservationStore};
use marquee_store::PgStore;

fn opening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 59, 0).unwrap()
}

fn show_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap()
}

struct Fixture {
    store: Arc<PgStore>,
    clock: Arc<ManualClock>,
    reservations: Arc<ReservationManager>,
    payments: Arc<PaymentTransactionManager>,
    tickets: TicketVerifier,
    user: Id,
    method: Id,
}

impl Fixture {
    async fn new(pool: &PgPool) -> Self {
        let store = Arc::new(PgStore::new(pool.clone()));
        let clock = Arc::new(ManualClock::new(opening()));
        let shared: Arc<dyn ReservationStore> = store.clone();

        let user = sqlx::query_scalar::<_, i64>(
            "INSERT INTO users (name, email) VALUES ('Jane', 'jane@example.com') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap();
        let method = sqlx::query_scalar::<_, i64>(
            "INSERT INTO payment_methods (name) VALUES ('bank_transfer') RETURNING id",
        )
        .fetch_one(pool)
        .await
        .unwrap();

        Self {
            reservations: Arc::new(ReservationManager::new(
                shared.clone(),
                clock.clone(),
                Duration::minutes(10),
            )),
            payments: Arc::new(PaymentTransactionManager::new(shared.clone(), clock.clone())),
            tickets: TicketVerifier::new(shared),
            store,
            clock,
            user,
            method,
        }
    }
}

/// Seeds cinema, studio, movie, screening and seats. Returns the screening id and
/// seat ids in the order of `codes`.
async fn seed_screening(
    pool: &PgPool,
    title: &str,
    start: DateTime<Utc>,
    minutes: i32,
    codes: &[&str],
) -> (Id, Vec<Id>) {
    let cinema = sqlx::query_scalar::<_, i64>("INSERT INTO cinemas (name) VALUES ('Marquee Central') RETURNING id")
        .fetch_one(pool)
        .await
        .unwrap();
    let studio = sqlx::query_scalar::<_, i64>(
        "INSERT INTO studios (cinema_id, name) VALUES ($1, 'Studio 1') RETURNING id",
    )
    .bind(cinema)
    .fetch_one(pool)
    .await
    .unwrap();
    let movie = sqlx::query_scalar::<_, i64>(
        "INSERT INTO movies (title, duration_minute) VALUES ($1, $2) RETURNING id",
    )
    .bind(title)
    .bind(minutes)
    .fetch_one(pool)
    .await
    .unwrap();
    let screening = sqlx::query_scalar::<_, i64>(
        "INSERT INTO screenings (studio_id, movie_id, start_time, end_time) VALUES ($1, $2, $3, $4) RETURNING id",
    )
    .bind(studio)
    .bind(movie)
    .bind(start)
    .bind(start + Duration::minutes(i64::from(minutes)))
    .fetch_one(pool)
    .await
    .unwrap();

    let mut seats = Vec::new();
    for code in codes {
        let id = sqlx::query_scalar::<_, i64>(
            "INSERT INTO seats (studio_id, seat_code) VALUES ($1, $2) RETURNING id",
        )
        .bind(studio)
        .bind(*code)
        .fetch_one(pool)
        .await
        .unwrap();
        seats.push(id);
    }
    (screening, seats)
}

// ---------------------------------------------------------------------------
// Seat claims
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../migrations")]
async fn claim_conflicts_until_hold_lapses(pool: PgPool) {
    let f = Fixture::new(&pool).await;
    let (screening, seats) = seed_screening(&pool, "Dune: Part Two", show_start(), 130, &["A1", "A2"]).await;

    let first = f
        .reservations
        .create_booking(f.user, screening, &[seats[0]])
        .await
        .unwrap();
    let held = f.store.held_seat_ids(screening, f.clock.now()).await.unwrap();
    assert_eq!(held, HashSet::from([seats[0]]));

    let err = f
        .reservations
        .create_booking(f.user, screening, &[seats[1], seats[0]])
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::Conflict(ConflictKind::SeatsTaken)));

    // nothing from the refused booking survives
    let held = f.store.held_seat_ids(screening, f.clock.now()).await.unwrap();
    assert_eq!(held, HashSet::from([seats[0]]));

    f.clock.advance(Duration::minutes(10));
    assert!(f.store.held_seat_ids(screening, f.clock.now()).await.unwrap().is_empty());
    let view = f.reservations.get_booking(first.id).await.unwrap();
    assert_eq!(view.booking.status, BookingStatus::Pending);
    assert_eq!(view.effective_status, EffectiveStatus::Expired);

    f.reservations
        .create_booking(f.user, screening, &[seats[0]])
        .await
        .unwrap();
}

#[sqlx::test(migrations = "../migrations")]
async fn concurrent_claims_on_one_seat_admit_exactly_one(pool: PgPool) {
    let f = Fixture::new(&pool).await;
    let (screening, seats) = seed_screening(&pool, "Dune: Part Two", show_start(), 130, &["B1"]).await;
    let seat = seats[0];

    let attempts = (0..8).map(|_| {
        let reservations = f.reservations.clone();
        let user = f.user;
        tokio::spawn(async move { reservations.create_booking(user, screening, &[seat]).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
    assert!(results
        .iter()
        .filter(|r| r.is_err())
        .all(|r| matches!(r, Err(CoreError::Conflict(ConflictKind::SeatsTaken)))));
}

#[sqlx::test(migrations = "../migrations")]
async fn overlapping_bookings_in_opposite_order_never_deadlock(pool: PgPool) {
    let f = Fixture::new(&pool).await;
    let codes = ["A1", "A2", "A3", "A4", "A5", "A6", "A7", "A8"];

    for round in 0..20 {
        let (screening, seats) = seed_screening(&pool, "Dune: Part Two", show_start(), 130, &codes).await;
        let reversed: Vec<Id> = seats.iter().rev().copied().collect();

        let attempts = [seats, reversed].map(|order| {
            let reservations = f.reservations.clone();
            let user = f.user;
            tokio::spawn(async move { reservations.create_booking(user, screening, &order).await })
        });
        let results: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap())
            .collect();

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1, "round {round}");
        assert!(
            results
                .iter()
                .any(|r| matches!(r, Err(CoreError::Conflict(ConflictKind::SeatsTaken)))),
            "round {round}: {results:?}"
        );
    }
}

// ---------------------------------------------------------------------------
// Payments
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../migrations")]
async fn concurrent_create_payment_returns_one_id(pool: PgPool) {
    let f = Fixture::new(&pool).await;
    let (screening, seats) = seed_screening(&pool, "Dune: Part Two", show_start(), 130, &["A1", "A2"]).await;
    let booking = f.reservations.create_booking(f.user, screening, &seats).await.unwrap();

    let attempts = (0..8).map(|_| {
        let payments = f.payments.clone();
        let method = f.method;
        tokio::spawn(async move { payments.create_payment(booking.id, method, 100_000).await })
    });
    let ids: HashSet<Id> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(ids.len(), 1);

    let rows = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM payments WHERE booking_id = $1")
        .bind(booking.id)
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(rows, 1);
}

#[sqlx::test(migrations = "../migrations")]
async fn duplicate_success_callbacks_issue_tickets_once(pool: PgPool) {
    let f = Fixture::new(&pool).await;
    let (screening, seats) = seed_screening(&pool, "Dune: Part Two", show_start(), 130, &["A1", "A2"]).await;
    let booking = f.reservations.create_booking(f.user, screening, &seats).await.unwrap();
    let payment_id = f.payments.create_payment(booking.id, f.method, 100_000).await.unwrap();

    let deliveries = (0..8).map(|i| {
        let payments = f.payments.clone();
        tokio::spawn(async move {
            payments
                .update_payment(payment_id, PaymentStatus::Success, &format!("T-{i}"))
                .await
        })
    });
    let outcomes: Vec<_> = join_all(deliveries)
        .await
        .into_iter()
        .map(|joined| joined.unwrap().unwrap())
        .collect();
    assert_eq!(outcomes.iter().filter(|o| o.is_some()).count(), 1);

    let tickets = f.tickets.tickets_for_booking(booking.id).await.unwrap();
    assert_eq!(tickets.len(), 2);

    let view = f.reservations.get_booking(booking.id).await.unwrap();
    assert_eq!(view.booking.status, BookingStatus::Paid);

    let ticket = f.tickets.verify(tickets[0].qr_token).await.unwrap();
    assert_eq!(ticket.seat_code, "A1");
    assert_eq!(ticket.screening.movie_title, "Dune: Part Two");
    assert_eq!(ticket.screening.cinema_name, "Marquee Central");

    let context = f.store.ticket_context(booking.id).await.unwrap().unwrap();
    assert_eq!(context.recipient.email, "jane@example.com");
    assert_eq!(context.tickets.len(), 2);

    // paid seats stay taken after the hold deadline
    f.clock.advance(Duration::hours(1));
    let held = f.store.held_seat_ids(screening, f.clock.now()).await.unwrap();
    assert_eq!(held.len(), 2);
}

// ---------------------------------------------------------------------------
// Booking history
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "../migrations")]
async fn booking_history_orders_by_screening_and_pages(pool: PgPool) {
    let f = Fixture::new(&pool).await;
    let (matinee, matinee_seats) =
        seed_screening(&pool, "Dune: Part Two", show_start(), 130, &["A1", "A2", "B1"]).await;
    let (evening, evening_seats) =
        seed_screening(&pool, "Perfect Days", show_start() + Duration::hours(10), 125, &["C1"]).await;

    let early = f
        .reservations
        .create_booking(f.user, matinee, &[matinee_seats[1], matinee_seats[0]])
        .await
        .unwrap();
    let second = f
        .reservations
        .create_booking(f.user, matinee, &[matinee_seats[2]])
        .await
        .unwrap();
    let late = f
        .reservations
        .create_booking(f.user, evening, &evening_seats)
        .await
        .unwrap();

    let history = f.reservations.booking_history(f.user, 10, 0).await.unwrap();
    assert_eq!(history.total, 3);
    let ids: Vec<_> = history.bookings.iter().map(|b| b.entry.booking_id).collect();
    assert_eq!(ids, vec![late.id, second.id, early.id]);
    assert_eq!(history.bookings[0].entry.movie_title, "Perfect Days");
    assert_eq!(history.bookings[2].entry.seat_codes, vec!["A1", "A2"]);
    assert_eq!(history.bookings[2].effective_status, EffectiveStatus::Pending);

    let page = f.reservations.booking_history(f.user, 2, 2).await.unwrap();
    assert_eq!(page.total, 3);
    assert_eq!(page.bookings.len(), 1);
    assert_eq!(page.bookings[0].entry.booking_id, early.id);
}
