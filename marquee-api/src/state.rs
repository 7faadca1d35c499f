use chrono::Duration;
use std::sync::Arc;

use marquee_booking::{
    NotificationDispatcher, PaymentTransactionManager, ReservationManager, SeatAvailabilityResolver,
    TicketVerifier,
};
use marquee_core::{Clock, ReservationStore};
use marquee_notify::{NotificationMetrics, NotificationQueue};

#[derive(Clone)]
pub struct AppState {
    pub reservations: Arc<ReservationManager>,
    pub seats: Arc<SeatAvailabilityResolver>,
    pub payments: Arc<PaymentTransactionManager>,
    pub tickets: Arc<TicketVerifier>,
    pub dispatcher: NotificationDispatcher,
    pub metrics: NotificationMetrics,
}

impl AppState {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        clock: Arc<dyn Clock>,
        hold_ttl: Duration,
        queue: NotificationQueue,
        metrics: NotificationMetrics,
    ) -> Self {
        Self {
            reservations: Arc::new(ReservationManager::new(store.clone(), clock.clone(), hold_ttl)),
            seats: Arc::new(SeatAvailabilityResolver::new(store.clone(), clock.clone())),
            payments: Arc::new(PaymentTransactionManager::new(store.clone(), clock)),
            tickets: Arc::new(TicketVerifier::new(store.clone())),
            dispatcher: NotificationDispatcher::new(store, queue),
            metrics,
        }
    }
}
