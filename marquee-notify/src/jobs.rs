use marquee_core::models::{Recipient, TicketContext};

/// Unit of work for the notification workers.
#[derive(Debug, Clone)]
pub enum NotificationJob {
    /// One-time code sent during account verification.
    VerificationCode { recipient: Recipient, code: String },
    /// All tickets of a paid booking, one QR attachment per seat.
    TicketBundle(TicketContext),
}

impl NotificationJob {
    pub fn kind(&self) -> &'static str {
        match self {
            NotificationJob::VerificationCode { .. } => "verification_code",
            NotificationJob::TicketBundle(_) => "ticket_bundle",
        }
    }
}
