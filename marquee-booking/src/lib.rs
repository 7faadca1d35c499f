pub mod availability;
pub mod dispatch;
pub mod payment;
pub mod reservation;
pub mod tickets;

pub use availability::SeatAvailabilityResolver;
pub use dispatch::NotificationDispatcher;
pub use payment::PaymentTransactionManager;
pub use reservation::{BookingHistory, BookingHistoryItem, BookingView, ReservationManager};
pub use tickets::TicketVerifier;
