use std::sync::Arc;
use tracing::{error, info, warn};

use marquee_core::models::{Id, Recipient};
use marquee_core::token::verification_code;
use marquee_core::ReservationStore;
use marquee_notify::{NotificationJob, NotificationQueue, NotifyError};
use marquee_shared::Masked;

const VERIFICATION_CODE_LEN: usize = 6;

/// Hands work to the notification pool after the triggering transaction has
/// committed. Nothing here can undo a payment.
#[derive(Clone)]
pub struct NotificationDispatcher {
    store: Arc<dyn ReservationStore>,
    queue: NotificationQueue,
}

impl NotificationDispatcher {
    pub fn new(store: Arc<dyn ReservationStore>, queue: NotificationQueue) -> Self {
        Self { store, queue }
    }

    /// Queues the ticket e-mail for a paid booking. Returns whether a job was queued;
    /// failures are logged and swallowed.
    pub async fn dispatch_tickets(&self, booking_id: Id) -> bool {
        let ctx = match self.store.ticket_context(booking_id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => {
                warn!(booking_id, "No ticket context for paid booking");
                return false;
            }
            Err(e) => {
                error!(booking_id, error = %e, "Failed to load ticket context");
                return false;
            }
        };

        let tickets = ctx.tickets.len();
        let to = Masked(ctx.recipient.email.clone());
        match self.queue.submit(NotificationJob::TicketBundle(ctx)).await {
            Ok(()) => {
                info!(booking_id, tickets, to = %to, "Ticket notification queued");
                true
            }
            Err(e) => {
                error!(booking_id, error = %e, "Failed to queue ticket notification");
                false
            }
        }
    }

    /// Generates a one-time code, queues it for delivery, and returns it so the
    /// caller can store it for comparison.
    pub async fn dispatch_verification_code(&self, recipient: Recipient) -> Result<String, NotifyError> {
        let code = verification_code(VERIFICATION_CODE_LEN);
        let user_id = recipient.user_id;
        self.queue
            .submit(NotificationJob::VerificationCode {
                recipient,
                code: code.clone(),
            })
            .await?;
        info!(user_id, "Verification code queued");
        Ok(code)
    }
}
