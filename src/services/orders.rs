//! Order tracking: placement, shipment, and cancellation.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::payments::{AuthorizeRequest, PaymentService};
use super::{random_id, Result, ServiceError};
use crate::gateway::{publish_json, EventGateway};
use crate::store::{KeyValueBucket, RecordStore};

pub const SUBJECT_ORDER_PLACED: &str = "order.placed";
pub const SUBJECT_ORDER_SHIPPED: &str = "order.shipped";
pub const SUBJECT_ORDER_CANCELLED: &str = "order.cancelled";

/// Lifecycle status of an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Placed,
    Shipped,
    Fulfilled,
    Cancelled,
}

/// The current state of an order in the system.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    #[serde(rename = "orderID")]
    pub order_id: String,
    #[serde(rename = "itemID")]
    pub item_id: String,
    pub item_name: String,
    pub quantity: i64,
    pub price: i64,
    pub total: i64,
    pub status: OrderStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tracking_number: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOrdersRequest {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetOrderRequest {
    #[serde(rename = "orderID", default)]
    pub order_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrderRequest {
    #[serde(rename = "itemID", default)]
    pub item_id: String,
    #[serde(default)]
    pub item_name: String,
    #[serde(default)]
    pub quantity: i64,
    #[serde(default)]
    pub price: i64,
    #[serde(rename = "processorID", default)]
    pub processor_id: String,
    #[serde(default)]
    pub processor_token: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShipOrderRequest {
    #[serde(rename = "orderID", default)]
    pub order_id: String,
}

/// Extra fields are ignored, so this also decodes from a transaction
/// payload carried by a chargeback event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CancelOrderRequest {
    #[serde(rename = "orderID", default)]
    pub order_id: String,
}

/// Operations to let customers place, track, and cancel orders. Also used
/// by the warehouse to mark when items ship.
#[async_trait]
pub trait OrderService: Send + Sync {
    /// Fetches all orders matching the given criteria.
    async fn search_orders(&self, req: SearchOrdersRequest) -> Result<Vec<Order>>;

    /// Fetches the current state of the specified order.
    async fn get_order(&self, req: GetOrderRequest) -> Result<Order>;

    /// Creates a new order with the given details and authorizes its
    /// payment before announcing the placement.
    async fn place_order(&self, req: PlaceOrderRequest) -> Result<Order>;

    /// Invoked by the warehouse once the order is on the delivery truck.
    async fn ship_order(&self, req: ShipOrderRequest) -> Result<Order>;

    /// Begins the cancellation process of the order. This is asynchronous,
    /// so some workflow tasks like refunding the transaction may still be
    /// pending when this operation completes.
    async fn cancel_order(&self, req: CancelOrderRequest) -> Result<Order>;
}

/// Read/write operations for the orders table. There is no actual database
/// behind this; records live in a key-value bucket keyed by order id.
pub struct OrderRepo {
    store: RecordStore<Order>,
}

impl OrderRepo {
    pub fn new(bucket: Arc<dyn KeyValueBucket>) -> Self {
        Self {
            store: RecordStore::new(bucket),
        }
    }

    pub async fn search(&self) -> Result<Vec<Order>> {
        Ok(self.store.values().await?)
    }

    pub async fn get(&self, order_id: &str) -> Result<Order> {
        self.store
            .get(order_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order not found: {}", order_id)))
    }

    /// Assigns a fresh id to the order and persists it.
    pub async fn create(&self, mut order: Order) -> Result<Order> {
        order.order_id = random_id(4);
        self.store.put(&order.order_id, &order).await?;
        Ok(order)
    }

    pub async fn update(&self, order: Order) -> Result<Order> {
        self.store.put(&order.order_id, &order).await?;
        Ok(order)
    }

    /// Seed the datastore with a few starter orders so a fresh install has
    /// something to play with. Writes nothing if records already exist.
    pub async fn seed_if_empty(&self) -> Result<()> {
        if !self.store.is_empty().await? {
            info!("Order data already present");
            return Ok(());
        }

        info!("Seeding starter order data");
        self.update(Order {
            order_id: "123".to_string(),
            item_id: "ABC".to_string(),
            item_name: "Do-it-yourself Brain Surgery Kit".to_string(),
            quantity: 1,
            price: 1999,
            total: 1999,
            status: OrderStatus::Shipped,
            tracking_number: Some(random_id(5)),
        })
        .await?;

        self.update(Order {
            order_id: "456".to_string(),
            item_id: "DEF".to_string(),
            item_name: "Rectangular Basketball".to_string(),
            quantity: 3,
            price: 900,
            total: 2700,
            status: OrderStatus::Placed,
            tracking_number: None,
        })
        .await?;

        self.update(Order {
            order_id: "789".to_string(),
            item_id: "GHI".to_string(),
            item_name: "The Internet".to_string(),
            quantity: 3,
            price: 14999,
            total: 44997,
            status: OrderStatus::Fulfilled,
            tracking_number: None,
        })
        .await?;

        Ok(())
    }
}

pub struct OrderServiceHandler {
    repo: OrderRepo,
    gateway: Arc<dyn EventGateway>,
    payments: Arc<dyn PaymentService>,
}

impl OrderServiceHandler {
    pub fn new(
        repo: OrderRepo,
        gateway: Arc<dyn EventGateway>,
        payments: Arc<dyn PaymentService>,
    ) -> Self {
        Self {
            repo,
            gateway,
            payments,
        }
    }
}

#[async_trait]
impl OrderService for OrderServiceHandler {
    async fn search_orders(&self, _req: SearchOrdersRequest) -> Result<Vec<Order>> {
        info!("Searching orders for customer");
        self.repo.search().await
    }

    async fn get_order(&self, req: GetOrderRequest) -> Result<Order> {
        info!(order_id = %req.order_id, "Fetching order");
        self.repo.get(&req.order_id).await
    }

    async fn place_order(&self, req: PlaceOrderRequest) -> Result<Order> {
        info!(item_name = %req.item_name, quantity = req.quantity, "Placing order");

        let order = self
            .repo
            .create(Order {
                order_id: String::new(),
                item_id: req.item_id,
                item_name: req.item_name,
                quantity: req.quantity,
                price: req.price,
                total: req.price * req.quantity,
                status: OrderStatus::Placed,
                tracking_number: None,
            })
            .await?;

        // Authorization happens synchronously as part of placement. If it
        // fails, the order record remains persisted; there is no rollback.
        self.payments
            .authorize(AuthorizeRequest {
                order_id: order.order_id.clone(),
                total: order.total,
                processor_id: req.processor_id,
                processor_token: req.processor_token,
            })
            .await?;

        publish_json(self.gateway.as_ref(), SUBJECT_ORDER_PLACED, &order).await?;
        Ok(order)
    }

    async fn ship_order(&self, req: ShipOrderRequest) -> Result<Order> {
        let mut order = self.repo.get(&req.order_id).await?;

        match order.status {
            OrderStatus::Cancelled => {
                return Err(ServiceError::InvalidState(format!(
                    "Can't ship cancelled order: {}",
                    order.order_id
                )));
            }
            OrderStatus::Shipped => {
                info!(order_id = %order.order_id, "Order already shipped");
                return Ok(order);
            }
            _ => {
                info!(order_id = %order.order_id, "Shipping order");
                order.status = OrderStatus::Shipped;
                order.tracking_number = Some(random_id(5));
                order = self.repo.update(order).await?;
            }
        }

        publish_json(self.gateway.as_ref(), SUBJECT_ORDER_SHIPPED, &order).await?;
        Ok(order)
    }

    async fn cancel_order(&self, req: CancelOrderRequest) -> Result<Order> {
        let mut order = self.repo.get(&req.order_id).await?;

        match order.status {
            OrderStatus::Cancelled => {
                info!(order_id = %order.order_id, "Order already cancelled");
                return Ok(order);
            }
            _ => {
                info!(order_id = %order.order_id, "Cancelling order");
                order.status = OrderStatus::Cancelled;
                order = self.repo.update(order).await?;
            }
        }

        publish_json(self.gateway.as_ref(), SUBJECT_ORDER_CANCELLED, &order).await?;
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_json_field_names() {
        let order = Order {
            order_id: "123".to_string(),
            item_id: "ABC".to_string(),
            item_name: "Widget".to_string(),
            quantity: 2,
            price: 100,
            total: 200,
            status: OrderStatus::Placed,
            tracking_number: None,
        };

        let json = serde_json::to_value(&order).unwrap();
        assert_eq!(json["orderID"], "123");
        assert_eq!(json["itemID"], "ABC");
        assert_eq!(json["itemName"], "Widget");
        assert_eq!(json["status"], "PLACED");
        assert!(json.get("trackingNumber").is_none());
    }

    #[test]
    fn test_cancel_request_decodes_from_transaction_payload() {
        let payload = br#"{"transactionID":"X","orderID":"123","total":1999,"status":"CHARGEBACK"}"#;
        let req: CancelOrderRequest = serde_json::from_slice(payload).unwrap();
        assert_eq!(req.order_id, "123");
    }
}
