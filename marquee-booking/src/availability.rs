use std::sync::Arc;

use marquee_core::models::{Id, SeatAvailability};
use marquee_core::{Clock, ConflictKind, CoreError, CoreResult, ReservationStore, SeatState};

/// Lock-free seat map for a screening.
pub struct SeatAvailabilityResolver {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl SeatAvailabilityResolver {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Every seat of the screening's studio with its state at the current instant.
    /// A pending hold past its deadline reads as available.
    pub async fn get_seats(&self, screening_id: Id) -> CoreResult<Vec<SeatAvailability>> {
        let now = self.clock.now();
        let window = self
            .store
            .screening_window(screening_id)
            .await?
            .ok_or(CoreError::NotFound("screening"))?;
        if !window.is_open(now) {
            return Err(ConflictKind::BookingClosed.into());
        }

        let seats = self.store.list_seats_for_studio(window.studio_id).await?;
        let held = self.store.held_seat_ids(screening_id, now).await?;

        Ok(seats
            .into_iter()
            .map(|seat| SeatAvailability {
                status: if held.contains(&seat.id) {
                    SeatState::Booked
                } else {
                    SeatState::Available
                },
                seat_id: seat.id,
                seat_code: seat.code,
            })
            .collect())
    }
}
