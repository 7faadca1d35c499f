#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::Arc;

use marquee_booking::{PaymentTransactionManager, ReservationManager, SeatAvailabilityResolver, TicketVerifier};
use marquee_core::models::{Id, SeatAvailability};
use marquee_core::{ManualClock, SeatState};
use marquee_store::{MemoryStore, ScreeningFixture, SeededScreening};

/// 09:59, one minute before a 10:00 show that runs 130 minutes.
pub fn opening() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 9, 59, 0).unwrap()
}

pub fn show_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 14, 10, 0, 0).unwrap()
}

pub struct Harness {
    pub store: MemoryStore,
    pub clock: Arc<ManualClock>,
    pub reservations: Arc<ReservationManager>,
    pub seats: SeatAvailabilityResolver,
    pub payments: Arc<PaymentTransactionManager>,
    pub tickets: TicketVerifier,
    pub user: Id,
    pub method: Id,
    pub screening: SeededScreening,
}

impl Harness {
    pub async fn new() -> Self {
        Self::with_ttl(Duration::minutes(10)).await
    }

    pub async fn with_ttl(ttl: Duration) -> Self {
        let store = MemoryStore::new();
        let clock = Arc::new(ManualClock::new(opening()));
        let user = store.add_user("Jane", "jane@example.com").await;
        let method = store.add_payment_method("bank_transfer").await;
        let screening = store
            .add_screening(
                ScreeningFixture::new(show_start(), 130)
                    .with_title("Dune: Part Two")
                    .with_seats(["A1", "A2", "A3", "B1"]),
            )
            .await;

        let shared = Arc::new(store.clone());
        Self {
            reservations: Arc::new(ReservationManager::new(shared.clone(), clock.clone(), ttl)),
            seats: SeatAvailabilityResolver::new(shared.clone(), clock.clone()),
            payments: Arc::new(PaymentTransactionManager::new(shared.clone(), clock.clone())),
            tickets: TicketVerifier::new(shared),
            store,
            clock,
            user,
            method,
            screening,
        }
    }

    /// Seat id by code, in fixture order A1, A2, A3, B1.
    pub fn seat(&self, code: &str) -> Id {
        let idx = ["A1", "A2", "A3", "B1"]
            .iter()
            .position(|c| *c == code)
            .unwrap();
        self.screening.seat_ids[idx]
    }

    pub async fn seat_state(&self, code: &str) -> SeatState {
        let seats: Vec<SeatAvailability> = self.seats.get_seats(self.screening.screening_id).await.unwrap();
        seats.into_iter().find(|s| s.seat_code == code).unwrap().status
    }
}
