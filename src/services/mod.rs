//! Business-logic services for the order management workflow.
//!
//! Service handlers are transport-oblivious: the HTTP gateway and the event
//! routes both call the same trait methods. Every handler that changes state
//! publishes a domain event describing the fact, which is what drives the
//! downstream workflow steps.

use rand::Rng;

use crate::gateway::GatewayError;
use crate::store::StoreError;

pub mod analytics;
pub mod notifications;
pub mod orders;
pub mod payments;

pub use analytics::{AnalyticsService, AnalyticsServiceHandler, TrackEventRequest};
pub use notifications::{
    NotificationService, NotificationServiceHandler, OrderNotificationRequest,
};
pub use orders::{Order, OrderRepo, OrderService, OrderServiceHandler, OrderStatus};
pub use payments::{
    PaymentService, PaymentServiceHandler, Transaction, TransactionRepo, TransactionStatus,
};

pub type Result<T> = std::result::Result<T, ServiceError>;

/// Errors surfaced by service operations. The HTTP layer maps these onto
/// status codes; event routes log and swallow them.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),

    /// The requested transition is not legal from the record's current
    /// status (e.g. shipping a cancelled order).
    #[error("{0}")]
    InvalidState(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// The 62 characters that make up the set of valid alphanumeric runes.
const ALPHANUMERIC: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

/// Generate a random alphanumeric identifier of the given length.
pub fn random_id(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| ALPHANUMERIC[rng.random_range(0..ALPHANUMERIC.len())] as char)
        .collect()
}
