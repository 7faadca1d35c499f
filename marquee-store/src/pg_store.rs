use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashSet;
use tracing::debug;
use uuid::Uuid;

use marquee_core::models::{
    Booking, BookingHistoryEntry, Id, IssuedTicket, NewBooking, Recipient, Seat, SeatClaim, ScreeningDetails,
    ScreeningWindow, Ticket, TicketContext, TicketView,
};
use marquee_core::payment::{NewPayment, Payment, PaymentMethod, PaymentStatus};
use marquee_core::{ReservationStore, StoreError, StoreResult, StoreTx};

/// Postgres-backed [`ReservationStore`].
///
/// "now" is always bound as a parameter; no query reads `NOW()`, so expiry follows
/// the caller's clock.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

// Internal structs for type-safe querying
#[derive(sqlx::FromRow)]
struct ScreeningWindowRow {
    screening_id: i64,
    studio_id: i64,
    movie_id: i64,
    start_time: DateTime<Utc>,
    duration_minutes: i32,
}

impl From<ScreeningWindowRow> for ScreeningWindow {
    fn from(row: ScreeningWindowRow) -> Self {
        Self {
            screening_id: row.screening_id,
            studio_id: row.studio_id,
            movie_id: row.movie_id,
            start_time: row.start_time,
            duration_minutes: row.duration_minutes,
        }
    }
}

#[derive(sqlx::FromRow)]
struct SeatRow {
    id: i64,
    studio_id: i64,
    seat_code: String,
}

impl From<SeatRow> for Seat {
    fn from(row: SeatRow) -> Self {
        Self {
            id: row.id,
            studio_id: row.studio_id,
            code: row.seat_code,
        }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: i64,
    user_id: i64,
    screening_id: i64,
    status: String,
    expired_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            screening_id: row.screening_id,
            status: row.status.parse().map_err(corrupt)?,
            expired_at: row.expired_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct BookingHistoryRow {
    booking_id: i64,
    screening_id: i64,
    movie_title: String,
    cinema_name: String,
    start_time: DateTime<Utc>,
    seat_codes: Vec<String>,
    status: String,
    expired_at: DateTime<Utc>,
    created_at: DateTime<Utc>,
}

impl TryFrom<BookingHistoryRow> for BookingHistoryEntry {
    type Error = StoreError;

    fn try_from(row: BookingHistoryRow) -> Result<Self, Self::Error> {
        Ok(Self {
            booking_id: row.booking_id,
            screening_id: row.screening_id,
            movie_title: row.movie_title,
            cinema_name: row.cinema_name,
            start_time: row.start_time,
            seat_codes: row.seat_codes,
            status: row.status.parse().map_err(corrupt)?,
            expired_at: row.expired_at,
            created_at: row.created_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: i64,
    booking_id: i64,
    payment_method_id: i64,
    amount: i64,
    status: String,
    transaction_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            booking_id: row.booking_id,
            payment_method_id: row.payment_method_id,
            amount: row.amount,
            status: row.status.parse().map_err(corrupt)?,
            transaction_id: row.transaction_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TicketRow {
    id: i64,
    booking_id: i64,
    seat_id: i64,
    qr_token: Uuid,
    issued_at: DateTime<Utc>,
}

impl From<TicketRow> for Ticket {
    fn from(row: TicketRow) -> Self {
        Self {
            id: row.id,
            booking_id: row.booking_id,
            seat_id: row.seat_id,
            qr_token: row.qr_token,
            issued_at: row.issued_at,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TicketViewRow {
    ticket_id: i64,
    booking_id: i64,
    seat_code: String,
    screening_id: i64,
    movie_title: String,
    cinema_name: String,
    studio_name: String,
    start_time: DateTime<Utc>,
    issued_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct TicketHeaderRow {
    booking_id: i64,
    user_id: i64,
    user_name: String,
    user_email: String,
    screening_id: i64,
    movie_title: String,
    cinema_name: String,
    studio_name: String,
    start_time: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct IssuedTicketRow {
    seat_code: String,
    qr_token: Uuid,
}

fn corrupt(err: marquee_core::models::ParseStatusError) -> StoreError {
    StoreError::Corrupt(err.to_string())
}

const SCREENING_WINDOW_SQL: &str = r#"
    SELECT s.id AS screening_id, s.studio_id, s.movie_id, s.start_time,
           m.duration_minute AS duration_minutes
    FROM screenings s
    JOIN movies m ON m.id = s.movie_id
    WHERE s.id = $1 AND s.deleted_at IS NULL
"#;

const BOOKING_COLUMNS: &str =
    "id, user_id, screening_id, status, expired_at, created_at, updated_at";

const PAYMENT_COLUMNS: &str =
    "id, booking_id, payment_method_id, amount, status, transaction_id, created_at, updated_at";

#[async_trait]
impl ReservationStore for PgStore {
    async fn begin(&self) -> StoreResult<Box<dyn StoreTx>> {
        let tx = self.pool.begin().await.map_err(StoreError::backend)?;
        Ok(Box::new(PgStoreTx { tx }))
    }

    async fn screening_window(&self, screening_id: Id) -> StoreResult<Option<ScreeningWindow>> {
        let row = sqlx::query_as::<_, ScreeningWindowRow>(SCREENING_WINDOW_SQL)
            .bind(screening_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(Into::into))
    }

    async fn list_seats_for_studio(&self, studio_id: Id) -> StoreResult<Vec<Seat>> {
        let rows = sqlx::query_as::<_, SeatRow>(
            "SELECT id, studio_id, seat_code FROM seats WHERE studio_id = $1 ORDER BY id",
        )
        .bind(studio_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn held_seat_ids(&self, screening_id: Id, now: DateTime<Utc>) -> StoreResult<HashSet<Id>> {
        // Same predicate as marquee_core::models::holds_seats
        let ids = sqlx::query_scalar::<_, i64>(
            r#"
            SELECT DISTINCT bs.seat_id
            FROM booking_seats bs
            JOIN bookings b ON b.id = bs.booking_id
            WHERE bs.screening_id = $1
              AND (b.status = 'paid' OR (b.status = 'pending' AND b.expired_at > $2))
            "#,
        )
        .bind(screening_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(ids.into_iter().collect())
    }

    async fn booking_with_seats(&self, booking_id: Id) -> StoreResult<Option<(Booking, Vec<Seat>)>> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1"
        ))
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let seats = sqlx::query_as::<_, SeatRow>(
            r#"
            SELECT s.id, s.studio_id, s.seat_code
            FROM booking_seats bs
            JOIN seats s ON s.id = bs.seat_id
            WHERE bs.booking_id = $1
            ORDER BY s.id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(Some((row.try_into()?, seats.into_iter().map(Into::into).collect())))
    }

    async fn bookings_for_user(&self, user_id: Id, limit: i64, offset: i64) -> StoreResult<Vec<BookingHistoryEntry>> {
        let rows = sqlx::query_as::<_, BookingHistoryRow>(
            r#"
            SELECT b.id AS booking_id, b.screening_id, m.title AS movie_title, c.name AS cinema_name,
                   sc.start_time, ARRAY_AGG(s.seat_code ORDER BY s.id) AS seat_codes,
                   b.status, b.expired_at, b.created_at
            FROM bookings b
            JOIN screenings sc ON sc.id = b.screening_id
            JOIN movies m ON m.id = sc.movie_id
            JOIN studios st ON st.id = sc.studio_id
            JOIN cinemas c ON c.id = st.cinema_id
            JOIN booking_seats bs ON bs.booking_id = b.id
            JOIN seats s ON s.id = bs.seat_id
            WHERE b.user_id = $1
            GROUP BY b.id, m.title, c.name, sc.start_time
            ORDER BY sc.start_time DESC, b.id DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn count_bookings_for_user(&self, user_id: Id) -> StoreResult<i64> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM bookings WHERE user_id = $1")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::backend)
    }

    async fn payment(&self, payment_id: Id) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1"
        ))
        .bind(payment_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn payment_methods(&self) -> StoreResult<Vec<PaymentMethod>> {
        let rows: Vec<(i64, String)> =
            sqlx::query_as("SELECT id, name FROM payment_methods ORDER BY id")
                .fetch_all(&self.pool)
                .await
                .map_err(StoreError::backend)?;
        Ok(rows
            .into_iter()
            .map(|(id, name)| PaymentMethod { id, name })
            .collect())
    }

    async fn tickets_for_booking(&self, booking_id: Id) -> StoreResult<Vec<Ticket>> {
        let rows = sqlx::query_as::<_, TicketRow>(
            "SELECT id, booking_id, seat_id, qr_token, issued_at FROM tickets WHERE booking_id = $1 ORDER BY id",
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;
        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn ticket_by_token(&self, qr_token: Uuid) -> StoreResult<Option<TicketView>> {
        let row = sqlx::query_as::<_, TicketViewRow>(
            r#"
            SELECT t.id AS ticket_id, t.booking_id, s.seat_code, sc.id AS screening_id,
                   m.title AS movie_title, c.name AS cinema_name, st.name AS studio_name,
                   sc.start_time, t.issued_at
            FROM tickets t
            JOIN seats s ON s.id = t.seat_id
            JOIN bookings b ON b.id = t.booking_id
            JOIN screenings sc ON sc.id = b.screening_id
            JOIN movies m ON m.id = sc.movie_id
            JOIN studios st ON st.id = sc.studio_id
            JOIN cinemas c ON c.id = st.cinema_id
            WHERE t.qr_token = $1
            "#,
        )
        .bind(qr_token)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(row.map(|r| TicketView {
            ticket_id: r.ticket_id,
            booking_id: r.booking_id,
            seat_code: r.seat_code,
            screening: ScreeningDetails {
                screening_id: r.screening_id,
                movie_title: r.movie_title,
                cinema_name: r.cinema_name,
                studio_name: r.studio_name,
                start_time: r.start_time,
            },
            issued_at: r.issued_at,
        }))
    }

    async fn ticket_context(&self, booking_id: Id) -> StoreResult<Option<TicketContext>> {
        let header = sqlx::query_as::<_, TicketHeaderRow>(
            r#"
            SELECT b.id AS booking_id, u.id AS user_id, u.name AS user_name, u.email AS user_email,
                   sc.id AS screening_id, m.title AS movie_title, c.name AS cinema_name,
                   st.name AS studio_name, sc.start_time
            FROM bookings b
            JOIN users u ON u.id = b.user_id
            JOIN screenings sc ON sc.id = b.screening_id
            JOIN movies m ON m.id = sc.movie_id
            JOIN studios st ON st.id = sc.studio_id
            JOIN cinemas c ON c.id = st.cinema_id
            WHERE b.id = $1
            "#,
        )
        .bind(booking_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        let Some(h) = header else {
            return Ok(None);
        };

        let tickets = sqlx::query_as::<_, IssuedTicketRow>(
            r#"
            SELECT s.seat_code, t.qr_token
            FROM tickets t
            JOIN seats s ON s.id = t.seat_id
            WHERE t.booking_id = $1
            ORDER BY t.id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&self.pool)
        .await
        .map_err(StoreError::backend)?;

        Ok(Some(TicketContext {
            booking_id: h.booking_id,
            recipient: Recipient {
                user_id: h.user_id,
                name: h.user_name,
                email: h.user_email,
            },
            screening: ScreeningDetails {
                screening_id: h.screening_id,
                movie_title: h.movie_title,
                cinema_name: h.cinema_name,
                studio_name: h.studio_name,
                start_time: h.start_time,
            },
            tickets: tickets
                .into_iter()
                .map(|t| IssuedTicket {
                    seat_code: t.seat_code,
                    qr_token: t.qr_token,
                })
                .collect(),
        }))
    }
}

/// Open Postgres transaction. Dropping it without commit rolls back.
pub struct PgStoreTx {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StoreTx for PgStoreTx {
    async fn screening_window(&mut self, screening_id: Id) -> StoreResult<Option<ScreeningWindow>> {
        // FOR SHARE keeps an admin edit of the screening from landing mid-booking
        let sql = format!("{SCREENING_WINDOW_SQL} FOR SHARE OF s");
        let row = sqlx::query_as::<_, ScreeningWindowRow>(&sql)
            .bind(screening_id)
            .fetch_optional(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;
        Ok(row.map(Into::into))
    }

    async fn insert_booking(&mut self, booking: &NewBooking) -> StoreResult<Booking> {
        let row = sqlx::query_as::<_, BookingRow>(&format!(
            r#"
            INSERT INTO bookings (user_id, screening_id, status, expired_at, created_at, updated_at)
            VALUES ($1, $2, 'pending', $3, $4, $4)
            RETURNING {BOOKING_COLUMNS}
            "#
        ))
        .bind(booking.user_id)
        .bind(booking.screening_id)
        .bind(booking.expired_at)
        .bind(booking.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        row.try_into()
    }

    async fn claim_seat(
        &mut self,
        booking_id: Id,
        screening_id: Id,
        seat_id: Id,
        now: DateTime<Utc>,
    ) -> StoreResult<SeatClaim> {
        let in_studio = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM seats s
                JOIN screenings sc ON sc.studio_id = s.studio_id
                WHERE s.id = $1 AND sc.id = $2
            )
            "#,
        )
        .bind(seat_id)
        .bind(screening_id)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;

        if !in_studio {
            return Ok(SeatClaim::UnknownSeat);
        }

        // Serializes claimants of the same (screening, seat) across every process
        // sharing the database. Waits, never skips; released at commit/rollback.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(format!("booking_seat:{screening_id}:{seat_id}"))
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;

        let taken = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1
                FROM booking_seats bs
                JOIN bookings b ON b.id = bs.booking_id
                WHERE bs.screening_id = $1
                  AND bs.seat_id = $2
                  AND bs.booking_id <> $3
                  AND (b.status = 'paid' OR (b.status = 'pending' AND b.expired_at > $4))
            )
            "#,
        )
        .bind(screening_id)
        .bind(seat_id)
        .bind(booking_id)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;

        if taken {
            debug!(screening_id, seat_id, "seat already held");
            return Ok(SeatClaim::Conflict);
        }

        sqlx::query(
            r#"
            INSERT INTO booking_seats (booking_id, screening_id, seat_id, booking_status, created_at)
            VALUES ($1, $2, $3, 'pending', $4)
            "#,
        )
        .bind(booking_id)
        .bind(screening_id)
        .bind(seat_id)
        .bind(now)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;

        Ok(SeatClaim::Claimed)
    }

    async fn lock_booking(&mut self, booking_id: Id) -> StoreResult<Option<Booking>> {
        sqlx::query_as::<_, BookingRow>(&format!(
            "SELECT {BOOKING_COLUMNS} FROM bookings WHERE id = $1 FOR UPDATE"
        ))
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn pending_payment_id(&mut self, booking_id: Id) -> StoreResult<Option<Id>> {
        sqlx::query_scalar::<_, i64>(
            "SELECT id FROM payments WHERE booking_id = $1 AND status = 'pending' ORDER BY id LIMIT 1",
        )
        .bind(booking_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::backend)
    }

    async fn payment_method_exists(&mut self, method_id: Id) -> StoreResult<bool> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM payment_methods WHERE id = $1)")
            .bind(method_id)
            .fetch_one(&mut *self.tx)
            .await
            .map_err(StoreError::backend)
    }

    async fn insert_payment(&mut self, payment: &NewPayment) -> StoreResult<Id> {
        sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO payments (booking_id, payment_method_id, amount, status, created_at, updated_at)
            VALUES ($1, $2, $3, 'pending', $4, $4)
            RETURNING id
            "#,
        )
        .bind(payment.booking_id)
        .bind(payment.payment_method_id)
        .bind(payment.amount)
        .bind(payment.created_at)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)
    }

    async fn lock_payment(&mut self, payment_id: Id) -> StoreResult<Option<Payment>> {
        sqlx::query_as::<_, PaymentRow>(&format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments WHERE id = $1 FOR UPDATE"
        ))
        .bind(payment_id)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?
        .map(TryInto::try_into)
        .transpose()
    }

    async fn settle_payment(
        &mut self,
        payment_id: Id,
        status: PaymentStatus,
        transaction_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE payments SET status = $1, transaction_id = $2, updated_at = $3 WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(transaction_id)
        .bind(now)
        .bind(payment_id)
        .execute(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(())
    }

    async fn mark_booking_paid(&mut self, booking_id: Id, now: DateTime<Utc>) -> StoreResult<Vec<Id>> {
        sqlx::query("UPDATE bookings SET status = 'paid', updated_at = $2 WHERE id = $1")
            .bind(booking_id)
            .bind(now)
            .execute(&mut *self.tx)
            .await
            .map_err(StoreError::backend)?;

        sqlx::query_scalar::<_, i64>(
            r#"
            UPDATE booking_seats SET booking_status = 'paid'
            WHERE booking_id = $1
            RETURNING seat_id
            "#,
        )
        .bind(booking_id)
        .fetch_all(&mut *self.tx)
        .await
        .map_err(StoreError::backend)
    }

    async fn insert_ticket(
        &mut self,
        booking_id: Id,
        seat_id: Id,
        qr_token: Uuid,
        now: DateTime<Utc>,
    ) -> StoreResult<Ticket> {
        let row = sqlx::query_as::<_, TicketRow>(
            r#"
            INSERT INTO tickets (booking_id, seat_id, qr_token, issued_at)
            VALUES ($1, $2, $3, $4)
            RETURNING id, booking_id, seat_id, qr_token, issued_at
            "#,
        )
        .bind(booking_id)
        .bind(seat_id)
        .bind(qr_token)
        .bind(now)
        .fetch_one(&mut *self.tx)
        .await
        .map_err(StoreError::backend)?;
        Ok(row.into())
    }

    async fn commit(self: Box<Self>) -> StoreResult<()> {
        self.tx.commit().await.map_err(StoreError::backend)
    }
}
