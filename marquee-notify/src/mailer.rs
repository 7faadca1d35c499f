//! Outbound delivery. Workers see only [`NotificationSender`]; which transport
//! sits behind it is decided once at startup.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use marquee_shared::Masked;
use tracing::info;

use crate::NotifyError;

#[derive(Debug, Clone)]
pub struct Attachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A fully rendered message, ready for the transport.
#[derive(Debug, Clone)]
pub struct Notification {
    pub to: Masked<String>,
    pub subject: String,
    pub html_body: String,
    pub attachments: Vec<Attachment>,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// STARTTLS relay through `lettre`. The transport is built once and reused.
pub struct SmtpSender {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpSender {
    pub fn new(
        host: &str,
        port: u16,
        from_address: &str,
        username: Option<String>,
        password: Option<String>,
    ) -> Result<Self, NotifyError> {
        let mut builder = AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(host)?.port(port);
        if let (Some(user), Some(pass)) = (username, password) {
            builder = builder.credentials(Credentials::new(user, pass));
        }

        Ok(Self {
            mailer: builder.build(),
            from: from_address.parse()?,
        })
    }

    fn build_message(&self, notification: &Notification) -> Result<Message, NotifyError> {
        let mut body = MultiPart::mixed().singlepart(SinglePart::html(notification.html_body.clone()));
        for attachment in &notification.attachments {
            let content_type = ContentType::parse(&attachment.content_type)
                .map_err(|e| NotifyError::Message(e.to_string()))?;
            body = body.singlepart(
                MailAttachment::new(attachment.filename.clone()).body(attachment.bytes.clone(), content_type),
            );
        }

        Message::builder()
            .from(self.from.clone())
            .to(notification.to.expose().parse()?)
            .subject(notification.subject.clone())
            .multipart(body)
            .map_err(|e| NotifyError::Message(e.to_string()))
    }
}

#[async_trait]
impl NotificationSender for SmtpSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let message = self.build_message(notification)?;
        self.mailer.send(message).await?;
        info!(to = %notification.to, subject = %notification.subject, "Notification email sent");
        Ok(())
    }
}

/// Used when no SMTP relay is configured. Logs and reports success.
#[derive(Debug, Default)]
pub struct LoggingSender;

#[async_trait]
impl NotificationSender for LoggingSender {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        info!(
            to = %notification.to,
            subject = %notification.subject,
            attachments = notification.attachments.len(),
            "SMTP not configured, notification logged only"
        );
        Ok(())
    }
}
