use std::sync::Arc;
use tracing::{debug, info, warn};

use marquee_core::models::{BookingStatus, Id};
use marquee_core::payment::{NewPayment, PaymentMethod, PaymentStatus};
use marquee_core::token::new_qr_token;
use marquee_core::{Clock, ConflictKind, CoreError, CoreResult, ReservationStore};

/// Drives a booking's payment through `pending -> success | failed`.
///
/// Both entry points lock their row first and keep the lock until commit, so
/// concurrent calls for the same booking or payment run one after another.
pub struct PaymentTransactionManager {
    store: Arc<dyn ReservationStore>,
    clock: Arc<dyn Clock>,
}

impl PaymentTransactionManager {
    pub fn new(store: Arc<dyn ReservationStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Returns the id of the booking's pending payment, creating it if there is none.
    pub async fn create_payment(&self, booking_id: Id, payment_method_id: Id, amount: i64) -> CoreResult<Id> {
        if amount <= 0 {
            return Err(CoreError::Validation("amount must be positive".into()));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or(CoreError::NotFound("booking"))?;

        match booking.status {
            BookingStatus::Cancelled => return Err(ConflictKind::BookingCancelled.into()),
            BookingStatus::Paid => return Err(ConflictKind::AlreadyPaid.into()),
            BookingStatus::Pending if !booking.holds_seats(now) => {
                return Err(ConflictKind::HoldExpired.into());
            }
            BookingStatus::Pending => {}
        }

        if !tx.payment_method_exists(payment_method_id).await? {
            return Err(CoreError::NotFound("payment method"));
        }

        if let Some(existing) = tx.pending_payment_id(booking_id).await? {
            tx.commit().await?;
            debug!(booking_id, payment_id = existing, "Reusing pending payment");
            return Ok(existing);
        }

        let payment_id = tx
            .insert_payment(&NewPayment {
                booking_id,
                payment_method_id,
                amount,
                created_at: now,
            })
            .await?;
        tx.commit().await?;

        info!(booking_id, payment_id, amount, "Payment created");
        Ok(payment_id)
    }

    /// Applies a gateway callback. Returns the booking id when this call moved the
    /// payment to `success` and issued tickets; `None` for failures and for
    /// callbacks on a payment that is already settled.
    pub async fn update_payment(
        &self,
        payment_id: Id,
        status: PaymentStatus,
        transaction_id: &str,
    ) -> CoreResult<Option<Id>> {
        if !status.is_terminal() {
            return Err(CoreError::Validation(format!("cannot settle a payment as {status}")));
        }

        let now = self.clock.now();
        let mut tx = self.store.begin().await?;

        let payment = tx
            .lock_payment(payment_id)
            .await?
            .ok_or(CoreError::NotFound("payment"))?;

        if payment.status.is_terminal() {
            debug!(payment_id, current = %payment.status, "Payment already settled, ignoring callback");
            return Ok(None);
        }

        tx.settle_payment(payment_id, status, Some(transaction_id), now).await?;

        if status == PaymentStatus::Failed {
            tx.commit().await?;
            info!(payment_id, booking_id = payment.booking_id, "Payment failed");
            return Ok(None);
        }

        let booking_id = payment.booking_id;
        let booking = tx
            .lock_booking(booking_id)
            .await?
            .ok_or(CoreError::NotFound("booking"))?;
        if !booking.holds_seats(now) {
            warn!(
                booking_id,
                payment_id,
                status = %booking.status,
                expired_at = %booking.expired_at,
                "Settling payment for a booking that no longer holds its seats"
            );
        }

        let seat_ids = tx.mark_booking_paid(booking_id, now).await?;
        for &seat_id in &seat_ids {
            tx.insert_ticket(booking_id, seat_id, new_qr_token(), now).await?;
        }
        tx.commit().await?;

        info!(payment_id, booking_id, tickets = seat_ids.len(), "Payment succeeded, tickets issued");
        Ok(Some(booking_id))
    }

    pub async fn list_payment_methods(&self) -> CoreResult<Vec<PaymentMethod>> {
        Ok(self.store.payment_methods().await?)
    }
}
