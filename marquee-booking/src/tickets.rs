use std::sync::Arc;
use uuid::Uuid;

use marquee_core::models::{Id, Ticket, TicketView};
use marquee_core::{CoreError, CoreResult, ReservationStore};

/// Read-only ticket lookups for the entrance gate and the booking page.
pub struct TicketVerifier {
    store: Arc<dyn ReservationStore>,
}

impl TicketVerifier {
    pub fn new(store: Arc<dyn ReservationStore>) -> Self {
        Self { store }
    }

    pub async fn verify(&self, qr_token: Uuid) -> CoreResult<TicketView> {
        self.store
            .ticket_by_token(qr_token)
            .await?
            .ok_or(CoreError::NotFound("ticket"))
    }

    pub async fn tickets_for_booking(&self, booking_id: Id) -> CoreResult<Vec<Ticket>> {
        Ok(self.store.tickets_for_booking(booking_id).await?)
    }
}
