pub mod handler;
pub mod jobs;
pub mod mailer;
pub mod metrics;
pub mod pool;
pub mod qr;
pub mod templates;

pub use handler::JobHandler;
pub use jobs::NotificationJob;
pub use mailer::{Attachment, LoggingSender, Notification, NotificationSender, SmtpSender};
pub use metrics::NotificationMetrics;
pub use pool::{NotificationPool, NotificationQueue};
pub use qr::{PngQrRenderer, QrRenderer};

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("QR rendering failed: {0}")]
    Render(String),
    #[error("Invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("Message build failed: {0}")]
    Message(String),
    #[error("SMTP transport error: {0}")]
    Transport(#[from] lettre::transport::smtp::Error),
    #[error("notification queue is closed")]
    QueueClosed,
    #[error("Metrics registry error: {0}")]
    Metrics(#[from] prometheus::Error),
}

pub type NotifyResult<T> = Result<T, NotifyError>;
