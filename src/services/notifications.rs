//! Customer notifications for order lifecycle changes.
//!
//! Pretends to fire off emails or text messages; what it really does is log
//! the request and publish a notification event for downstream reporting.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::Result;
use crate::gateway::{publish_json, EventGateway};

pub const SUBJECT_NOTIFICATION_ORDER_PLACED: &str = "notification.orderPlaced";
pub const SUBJECT_NOTIFICATION_ORDER_CANCELLED: &str = "notification.orderCancelled";

/// Context for an order-based notification. Decodes from a full order
/// payload; only the order id matters here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderNotificationRequest {
    #[serde(rename = "orderID", default)]
    pub order_id: String,
}

#[async_trait]
pub trait NotificationService: Send + Sync {
    /// Fired after an order has been placed. Lets the user know the order
    /// has been received and processing has started.
    async fn send_order_placed_message(&self, req: OrderNotificationRequest) -> Result<()>;

    /// Fired after a customer cancels an order. Confirms the cancellation
    /// process is underway.
    async fn send_order_cancelled_message(&self, req: OrderNotificationRequest) -> Result<()>;
}

pub struct NotificationServiceHandler {
    gateway: Arc<dyn EventGateway>,
}

impl NotificationServiceHandler {
    pub fn new(gateway: Arc<dyn EventGateway>) -> Self {
        Self { gateway }
    }
}

#[async_trait]
impl NotificationService for NotificationServiceHandler {
    async fn send_order_placed_message(&self, req: OrderNotificationRequest) -> Result<()> {
        info!(order_id = %req.order_id, "Sending order-placed message");

        // Pretend we looked up the customer and fired off an email or text.
        publish_json(
            self.gateway.as_ref(),
            SUBJECT_NOTIFICATION_ORDER_PLACED,
            &req,
        )
        .await?;
        Ok(())
    }

    async fn send_order_cancelled_message(&self, req: OrderNotificationRequest) -> Result<()> {
        info!(order_id = %req.order_id, "Sending order-cancelled message");

        // Pretend we looked up the customer and fired off an email or text.
        publish_json(
            self.gateway.as_ref(),
            SUBJECT_NOTIFICATION_ORDER_CANCELLED,
            &req,
        )
        .await?;
        Ok(())
    }
}
