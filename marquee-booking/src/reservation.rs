use chrono::Duration;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use marquee_core::models::{
    Booking, BookingHistoryEntry, EffectiveStatus, Id, NewBooking, Seat, SeatClaim,
};
use marquee_core::{Clock, ConflictKind, CoreError, CoreResult, ReservationStore};

/// Places seat holds. A booking is created pending and holds its seats for
/// `hold_ttl`, after which readers treat it as expired without any write.
pub struct ReservationManager {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
    hold_ttl: Duration,
}

/// A booking as a reader sees it at a given instant.
#[derive(Debug, Clone, Serialize)]
pub struct BookingView {
    #[serde(flatten)]
    pub booking: Booking,
    pub effective_status: EffectiveStatus,
    pub seats: Vec<Seat>,
}

/// Largest page `booking_history` hands out.
pub const MAX_HISTORY_PAGE: i64 = 100;

#[derive(Debug, Clone, Serialize)]
pub struct BookingHistoryItem {
    #[serde(flatten)]
    pub entry: BookingHistoryEntry,
    pub effective_status: EffectiveStatus,
}

/// One page of a user's bookings plus the total across all pages.
#[derive(Debug, Clone, Serialize)]
pub struct BookingHistory {
    pub user_id: Id,
    pub limit: i64,
    pub offset: i64,
    pub total: i64,
    pub bookings: Vec<BookingHistoryItem>,
}

impl ReservationManager {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>, hold_ttl: Duration) -> Self {
        Self {
            store,
            clock,
            hold_ttl,
        }
    }

    /// All-or-nothing: either every seat is claimed for the new booking, or the
    /// transaction is dropped and nothing persists.
    pub async fn create_booking(&self, user_id: Id, screening_id: Id, seat_ids: &[Id]) -> CoreResult<Booking> {
        if seat_ids.is_empty() {
            return Err(CoreError::Validation("seat_ids must not be empty".into()));
        }
        // Every claimant locks seats in ascending id order, so two requests for
        // overlapping seats cannot each hold one lock while waiting on the other.
        let mut ordered = seat_ids.to_vec();
        ordered.sort_unstable();
        ordered.dedup();
        if ordered.len() != seat_ids.len() {
            return Err(CoreError::Validation("seat_ids must not repeat".into()));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let window = tx
            .screening_window(screening_id)
            .await?
            .ok_or(CoreError::NotFound("screening"))?;
        if !window.is_open(now) {
            debug!(screening_id, closes_at = %window.closes_at(), "Booking refused, window closed");
            return Err(ConflictKind::BookingClosed.into());
        }

        let booking = tx
            .insert_booking(&NewBooking {
                user_id,
                screening_id,
                created_at: now,
                expired_at: now + self.hold_ttl,
            })
            .await?;

        for &seat_id in &ordered {
            match tx.claim_seat(booking.id, screening_id, seat_id, now).await? {
                SeatClaim::Claimed => {}
                SeatClaim::Conflict => {
                    debug!(screening_id, seat_id, "Seat already held, rolling back booking");
                    return Err(ConflictKind::SeatsTaken.into());
                }
                SeatClaim::UnknownSeat => return Err(CoreError::NotFound("seat")),
            }
        }

        tx.commit().await?;

        info!(
            booking_id = booking.id,
            user_id,
            screening_id,
            seats = seat_ids.len(),
            expired_at = %booking.expired_at,
            "Booking created"
        );
        Ok(booking)
    }

    pub async fn get_booking(&self, booking_id: Id) -> CoreResult<BookingView> {
        let (booking, seats) = self
            .store
            .booking_with_seats(booking_id)
            .await?
            .ok_or(CoreError::NotFound("booking"))?;

        Ok(BookingView {
            effective_status: booking.effective_status(self.clock.now()),
            booking,
            seats,
        })
    }

    pub async fn booking_history(&self, user_id: Id, limit: i64, offset: i64) -> CoreResult<BookingHistory> {
        if !(1..=MAX_HISTORY_PAGE).contains(&limit) {
            return Err(CoreError::Validation(format!(
                "limit must be between 1 and {MAX_HISTORY_PAGE}"
            )));
        }
        if offset < 0 {
            return Err(CoreError::Validation("offset must not be negative".into()));
        }

        let now = self.clock.now();
        let total = self.store.count_bookings_for_user(user_id).await?;
        let bookings = self
            .store
            .bookings_for_user(user_id, limit, offset)
            .await?
            .into_iter()
            .map(|entry| BookingHistoryItem {
                effective_status: entry.effective_status(now),
                entry,
            })
            .collect();

        Ok(BookingHistory {
            user_id,
            limit,
            offset,
            total,
            bookings,
        })
    }
}
