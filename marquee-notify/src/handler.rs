use marquee_core::models::TicketContext;
use marquee_shared::Masked;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::jobs::NotificationJob;
use crate::mailer::{Attachment, Notification, NotificationSender};
use crate::metrics::NotificationMetrics;
use crate::qr::QrRenderer;
use crate::templates;

/// Turns a job into a message, sends it, and counts the outcome.
#[derive(Clone)]
pub struct JobHandler {
    sender: Arc<dyn NotificationSender>,
    renderer: Arc<dyn QrRenderer>,
    metrics: NotificationMetrics,
    base_url: String,
}

impl JobHandler {
    pub fn new(
        sender: Arc<dyn NotificationSender>,
        renderer: Arc<dyn QrRenderer>,
        metrics: NotificationMetrics,
        base_url: impl Into<String>,
    ) -> Self {
        Self {
            sender,
            renderer,
            metrics,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    pub fn metrics(&self) -> &NotificationMetrics {
        &self.metrics
    }

    /// Link encoded in the QR code of a ticket.
    pub fn verify_url(&self, qr_token: &uuid::Uuid) -> String {
        format!("{}/v1/tickets/verify?token={}", self.base_url, qr_token)
    }

    /// Exactly one metrics increment per call. Never returns an error: a failed
    /// delivery is logged and counted, nothing else.
    pub async fn handle(&self, worker: usize, job: NotificationJob) {
        let kind = job.kind();
        let notification = self.prepare(job);

        match self.sender.send(&notification).await {
            Ok(()) => {
                self.metrics.record_sent();
                info!(worker, kind, to = %notification.to, "Notification delivered");
            }
            Err(e) => {
                self.metrics.record_failed();
                error!(worker, kind, to = %notification.to, error = %e, "Notification delivery failed");
            }
        }
    }

    fn prepare(&self, job: NotificationJob) -> Notification {
        match job {
            NotificationJob::VerificationCode { recipient, code } => Notification {
                html_body: templates::verification_email(&recipient.name, &code),
                to: Masked(recipient.email),
                subject: templates::VERIFICATION_SUBJECT.to_string(),
                attachments: Vec::new(),
            },
            NotificationJob::TicketBundle(ctx) => Notification {
                html_body: templates::ticket_email(&ctx),
                attachments: self.render_tickets(&ctx),
                to: Masked(ctx.recipient.email),
                subject: templates::TICKET_SUBJECT.to_string(),
            },
        }
    }

    fn render_tickets(&self, ctx: &TicketContext) -> Vec<Attachment> {
        ctx.tickets
            .iter()
            .filter_map(|ticket| {
                match self.renderer.render(&self.verify_url(&ticket.qr_token)) {
                    Ok(bytes) => Some(Attachment {
                        filename: format!("ticket-{}.png", ticket.seat_code),
                        content_type: self.renderer.content_type().to_string(),
                        bytes,
                    }),
                    Err(e) => {
                        warn!(
                            booking_id = ctx.booking_id,
                            seat = %ticket.seat_code,
                            error = %e,
                            "Skipping ticket whose QR failed to render"
                        );
                        None
                    }
                }
            })
            .collect()
    }
}
