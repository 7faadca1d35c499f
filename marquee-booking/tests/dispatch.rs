mod common;

use async_trait::async_trait;
use std::sync::{Arc, Mutex};

use common::Harness;
use marquee_booking::NotificationDispatcher;
use marquee_core::models::Recipient;
use marquee_core::payment::PaymentStatus;
use marquee_notify::{
    JobHandler, Notification, NotificationMetrics, NotificationPool, NotificationSender, NotifyError,
    PngQrRenderer,
};

#[derive(Default)]
struct Outbox {
    sent: Mutex<Vec<Notification>>,
}

#[async_trait]
impl NotificationSender for Outbox {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

fn pool(outbox: Arc<Outbox>) -> (NotificationPool, NotificationMetrics) {
    let metrics = NotificationMetrics::new().unwrap();
    let handler = JobHandler::new(
        outbox,
        Arc::new(PngQrRenderer::default()),
        metrics.clone(),
        "https://tickets.example.com",
    );
    (NotificationPool::start(3, 10, handler), metrics)
}

#[tokio::test]
async fn test_paid_booking_gets_ticket_mail_with_qr_per_seat() {
    let h = Harness::new().await;
    let outbox = Arc::new(Outbox::default());
    let (pool, metrics) = pool(outbox.clone());
    let dispatcher = NotificationDispatcher::new(Arc::new(h.store.clone()), pool.queue());

    let booking = h
        .reservations
        .create_booking(h.user, h.screening.screening_id, &[h.seat("A1"), h.seat("B1")])
        .await
        .unwrap();
    let payment_id = h.payments.create_payment(booking.id, h.method, 90_000).await.unwrap();
    let paid = h
        .payments
        .update_payment(payment_id, PaymentStatus::Success, "T-1")
        .await
        .unwrap()
        .unwrap();

    assert!(dispatcher.dispatch_tickets(paid).await);
    pool.shutdown().await;

    let sent = outbox.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].subject, "Your Ticket Is Ready");
    assert_eq!(sent[0].to.expose(), "jane@example.com");
    let names: Vec<_> = sent[0].attachments.iter().map(|a| a.filename.as_str()).collect();
    assert_eq!(names, vec!["ticket-A1.png", "ticket-B1.png"]);
    assert!(sent[0].attachments.iter().all(|a| a.bytes.starts_with(&[0x89, b'P', b'N', b'G'])));
    assert_eq!(metrics.snapshot(), (1, 0));
}

#[tokio::test]
async fn test_dispatch_for_unknown_booking_is_swallowed() {
    let h = Harness::new().await;
    let outbox = Arc::new(Outbox::default());
    let (pool, metrics) = pool(outbox.clone());
    let dispatcher = NotificationDispatcher::new(Arc::new(h.store.clone()), pool.queue());

    assert!(!dispatcher.dispatch_tickets(9_999).await);
    pool.shutdown().await;

    assert!(outbox.sent.lock().unwrap().is_empty());
    assert_eq!(metrics.snapshot(), (0, 0));
}

#[tokio::test]
async fn test_dispatch_after_shutdown_does_not_fail_payment_flow() {
    let h = Harness::new().await;
    let outbox = Arc::new(Outbox::default());
    let (pool, _) = pool(outbox);
    let dispatcher = NotificationDispatcher::new(Arc::new(h.store.clone()), pool.queue());
    pool.shutdown().await;

    let booking = h
        .reservations
        .create_booking(h.user, h.screening.screening_id, &[h.seat("A3")])
        .await
        .unwrap();
    let payment_id = h.payments.create_payment(booking.id, h.method, 45_000).await.unwrap();
    let paid = h
        .payments
        .update_payment(payment_id, PaymentStatus::Success, "T-1")
        .await
        .unwrap()
        .unwrap();

    assert!(!dispatcher.dispatch_tickets(paid).await);
    assert_eq!(h.tickets.tickets_for_booking(paid).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_verification_code_is_mailed_and_returned() {
    let h = Harness::new().await;
    let outbox = Arc::new(Outbox::default());
    let (pool, _) = pool(outbox.clone());
    let dispatcher = NotificationDispatcher::new(Arc::new(h.store.clone()), pool.queue());

    let code = dispatcher
        .dispatch_verification_code(Recipient {
            user_id: h.user,
            name: "Jane".to_string(),
            email: "jane@example.com".to_string(),
        })
        .await
        .unwrap();
    pool.shutdown().await;

    assert_eq!(code.len(), 6);
    assert!(code.chars().all(|c| c.is_ascii_digit()));
    let sent = outbox.sent.lock().unwrap();
    assert_eq!(sent[0].subject, "Your Verification Code");
    assert!(sent[0].html_body.contains(&code));
    assert!(sent[0].attachments.is_empty());
}
