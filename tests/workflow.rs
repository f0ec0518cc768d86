//! End-to-end workflow tests over the in-memory gateway.
//!
//! These run the real route table and service handlers without a broker,
//! asserting on the events that flow and the record states they leave
//! behind.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use orderflow::gateway::{
    attach, DeliverPolicy, Event, EventGateway, HandlerError, MemoryEventGateway, RouteHandler,
    RouteSpec,
};
use orderflow::routes::{self, ROUTE_INACTIVITY, STREAM_ORDERS, STREAM_PAYMENTS};
use orderflow::services::orders::{
    CancelOrderRequest, GetOrderRequest, PlaceOrderRequest, ShipOrderRequest,
    SUBJECT_ORDER_CANCELLED, SUBJECT_ORDER_PLACED, SUBJECT_ORDER_SHIPPED,
};
use orderflow::services::payments::{
    ChargeRequest, ChargebackRequest, GetTransactionRequest, RefundRequest,
    SearchTransactionsCriteria, SUBJECT_PAYMENT_CHARGEBACK, SUBJECT_PAYMENT_REFUNDED,
};
use orderflow::services::{
    AnalyticsService, AnalyticsServiceHandler, NotificationService, NotificationServiceHandler,
    OrderRepo, OrderService, OrderServiceHandler, OrderStatus, PaymentService,
    PaymentServiceHandler, ServiceError, TransactionRepo, TransactionStatus,
};
use orderflow::store::MemoryBucket;

struct Fixture {
    gateway: Arc<MemoryEventGateway>,
    orders: Arc<dyn OrderService>,
    payments: Arc<dyn PaymentService>,
}

/// Wire the full workflow (seeded repos, all services, all routes) over an
/// in-memory gateway.
async fn start_workflow() -> Fixture {
    let gateway = Arc::new(MemoryEventGateway::new());

    let order_repo = OrderRepo::new(Arc::new(MemoryBucket::new()));
    order_repo.seed_if_empty().await.unwrap();
    let transaction_repo = TransactionRepo::new(Arc::new(MemoryBucket::new()));
    transaction_repo.seed_if_empty().await.unwrap();

    let payments: Arc<dyn PaymentService> = Arc::new(PaymentServiceHandler::new(
        transaction_repo,
        gateway.clone() as Arc<dyn EventGateway>,
    ));
    let orders: Arc<dyn OrderService> = Arc::new(OrderServiceHandler::new(
        order_repo,
        gateway.clone() as Arc<dyn EventGateway>,
        Arc::clone(&payments),
    ));
    let notifications: Arc<dyn NotificationService> = Arc::new(NotificationServiceHandler::new(
        gateway.clone() as Arc<dyn EventGateway>,
    ));
    let analytics: Arc<dyn AnalyticsService> = Arc::new(AnalyticsServiceHandler::new());

    routes::run(
        gateway.clone() as Arc<dyn EventGateway>,
        &routes::workflow_streams(),
        routes::workflow_routes(Arc::clone(&orders), Arc::clone(&payments), notifications, analytics),
    )
    .await
    .unwrap();

    Fixture {
        gateway,
        orders,
        payments,
    }
}

async fn wait_for_published(gateway: &MemoryEventGateway, subject: &str, count: usize) {
    for _ in 0..200 {
        if gateway.published_count(subject).await >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("timed out waiting for {} event(s) on {}", count, subject);
}

async fn wait_for_acked(gateway: &MemoryEventGateway, stream: &str, group: &str, count: usize) {
    for _ in 0..200 {
        if gateway.acked_count(stream, group).await >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!(
        "timed out waiting for {} ack(s) on {}/{}",
        count, stream, group
    );
}

/// Give in-flight routes a moment to finish before a negative assertion.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(100)).await;
}

fn place_request() -> PlaceOrderRequest {
    PlaceOrderRequest {
        item_id: "JKL".to_string(),
        item_name: "Left-handed Screwdriver".to_string(),
        quantity: 2,
        price: 100,
        processor_id: "STRIPE".to_string(),
        processor_token: "tok-test".to_string(),
    }
}

#[tokio::test]
async fn test_place_order_authorizes_payment_and_notifies() {
    let fx = start_workflow().await;

    let order = fx.orders.place_order(place_request()).await.unwrap();
    assert_eq!(order.status, OrderStatus::Placed);
    assert_eq!(order.total, 200);
    assert_eq!(order.order_id.len(), 4);

    assert_eq!(fx.gateway.published_count(SUBJECT_ORDER_PLACED).await, 1);

    // Authorization happened synchronously during placement.
    let transactions = fx
        .payments
        .search_transactions(SearchTransactionsCriteria::default())
        .await
        .unwrap();
    let transaction = transactions
        .iter()
        .find(|t| t.order_id == order.order_id)
        .expect("authorized transaction for the new order");
    assert_eq!(transaction.status, TransactionStatus::Authorized);
    assert_eq!(transaction.total, 200);

    // The placement event fans out to the notification route.
    wait_for_published(&fx.gateway, "notification.orderPlaced", 1).await;
}

#[tokio::test]
async fn test_cancel_order_refunds_and_notifies() {
    let fx = start_workflow().await;

    let order = fx
        .orders
        .cancel_order(CancelOrderRequest {
            order_id: "456".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);

    wait_for_published(&fx.gateway, SUBJECT_PAYMENT_REFUNDED, 1).await;
    wait_for_published(&fx.gateway, "notification.orderCancelled", 1).await;

    let transaction = fx
        .payments
        .get_transaction(GetTransactionRequest {
            transaction_id: "Y".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Refunded);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let fx = start_workflow().await;

    let cancel = CancelOrderRequest {
        order_id: "456".to_string(),
    };
    fx.orders.cancel_order(cancel.clone()).await.unwrap();
    let again = fx.orders.cancel_order(cancel).await.unwrap();
    assert_eq!(again.status, OrderStatus::Cancelled);

    settle().await;
    // The no-op cancellation publishes nothing.
    assert_eq!(fx.gateway.published_count(SUBJECT_ORDER_CANCELLED).await, 1);
}

#[tokio::test]
async fn test_cannot_ship_cancelled_order() {
    let fx = start_workflow().await;

    fx.orders
        .cancel_order(CancelOrderRequest {
            order_id: "456".to_string(),
        })
        .await
        .unwrap();

    let result = fx
        .orders
        .ship_order(ShipOrderRequest {
            order_id: "456".to_string(),
        })
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));

    settle().await;
    assert_eq!(fx.gateway.published_count(SUBJECT_ORDER_SHIPPED).await, 0);
}

#[tokio::test]
async fn test_ship_is_idempotent() {
    let fx = start_workflow().await;

    // Order 123 ships in the seed data.
    let order = fx
        .orders
        .ship_order(ShipOrderRequest {
            order_id: "123".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);

    settle().await;
    assert_eq!(fx.gateway.published_count(SUBJECT_ORDER_SHIPPED).await, 0);
}

#[tokio::test]
async fn test_ship_assigns_tracking_number() {
    let fx = start_workflow().await;

    let order = fx
        .orders
        .ship_order(ShipOrderRequest {
            order_id: "456".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(order.status, OrderStatus::Shipped);
    assert_eq!(order.tracking_number.as_deref().map(str::len), Some(5));
    assert_eq!(fx.gateway.published_count(SUBJECT_ORDER_SHIPPED).await, 1);
}

#[tokio::test]
async fn test_chargeback_cancels_order_without_double_refund() {
    let fx = start_workflow().await;

    // Transaction X backs order 123.
    let transaction = fx
        .payments
        .chargeback(ChargebackRequest {
            transaction_id: "X".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Chargeback);
    assert_eq!(
        fx.gateway.published_count(SUBJECT_PAYMENT_CHARGEBACK).await,
        1
    );

    // The chargeback event drives the order cancellation...
    wait_for_published(&fx.gateway, SUBJECT_ORDER_CANCELLED, 1).await;
    for _ in 0..200 {
        let order = fx
            .orders
            .get_order(GetOrderRequest {
                order_id: "123".to_string(),
            })
            .await
            .unwrap();
        if order.status == OrderStatus::Cancelled {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    // ...whose refund step sees an already-reversed transaction and stays
    // quiet instead of refunding on top of the chargeback.
    settle().await;
    assert_eq!(fx.gateway.published_count(SUBJECT_PAYMENT_REFUNDED).await, 0);
    let transaction = fx
        .payments
        .get_transaction(GetTransactionRequest {
            transaction_id: "X".to_string(),
        })
        .await
        .unwrap();
    assert_eq!(transaction.status, TransactionStatus::Chargeback);
}

#[tokio::test]
async fn test_cannot_charge_reversed_transaction() {
    let fx = start_workflow().await;

    fx.payments
        .refund(RefundRequest {
            transaction_id: "Y".to_string(),
            order_id: String::new(),
        })
        .await
        .unwrap();

    let result = fx
        .payments
        .charge(ChargeRequest {
            transaction_id: "Y".to_string(),
            order_id: String::new(),
        })
        .await;
    assert!(matches!(result, Err(ServiceError::InvalidState(_))));
}

#[tokio::test]
async fn test_analytics_sees_every_stream() {
    let fx = start_workflow().await;

    // Placement publishes order.placed and payment.authorized; the
    // notification route then adds notification.orderPlaced.
    fx.orders.place_order(place_request()).await.unwrap();

    wait_for_acked(&fx.gateway, STREAM_ORDERS, "analytics-orders", 1).await;
    wait_for_acked(&fx.gateway, STREAM_PAYMENTS, "analytics-payments", 1).await;
    wait_for_acked(
        &fx.gateway,
        routes::STREAM_NOTIFICATIONS,
        "analytics-notifications",
        1,
    )
    .await;
}

fn counting_handler(counter: Arc<AtomicUsize>) -> Arc<dyn RouteHandler> {
    Arc::new(move |_event: Event| {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<(), HandlerError>(())
        }
        .boxed()
    })
}

fn failing_handler() -> Arc<dyn RouteHandler> {
    Arc::new(|event: Event| {
        async move {
            Err::<(), HandlerError>(format!("no thanks: {}", event.subject).into())
        }
        .boxed()
    })
}

fn route_spec(group: &str) -> RouteSpec {
    RouteSpec {
        group: group.to_string(),
        filter_subject: "order.>".to_string(),
        deliver_policy: DeliverPolicy::New,
        inactive_threshold: ROUTE_INACTIVITY,
    }
}

#[tokio::test]
async fn test_failing_handler_still_consumes_events() {
    let gateway = Arc::new(MemoryEventGateway::new());
    gateway
        .ensure_stream(&routes::workflow_streams()[0])
        .await
        .unwrap();

    let subscription = gateway
        .subscribe(STREAM_ORDERS, &route_spec("failing"))
        .await
        .unwrap();
    attach(subscription, failing_handler());

    for _ in 0..2 {
        gateway
            .publish("order.placed", bytes::Bytes::from_static(b"{}"))
            .await
            .unwrap();
    }

    // Both deliveries get acknowledged despite the handler errors, and the
    // loop keeps going after the first failure.
    wait_for_acked(&gateway, STREAM_ORDERS, "failing", 2).await;
}

#[tokio::test]
async fn test_competing_consumers_split_deliveries() {
    let gateway = Arc::new(MemoryEventGateway::new());
    gateway
        .ensure_stream(&routes::workflow_streams()[0])
        .await
        .unwrap();

    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    for counter in [&first, &second] {
        let subscription = gateway
            .subscribe(STREAM_ORDERS, &route_spec("workers"))
            .await
            .unwrap();
        attach(subscription, counting_handler(Arc::clone(counter)));
    }

    for _ in 0..4 {
        gateway
            .publish("order.placed", bytes::Bytes::from_static(b"{}"))
            .await
            .unwrap();
    }

    wait_for_acked(&gateway, STREAM_ORDERS, "workers", 4).await;
    // Each delivery went to exactly one instance.
    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_undecodable_event_is_consumed_not_redelivered() {
    let fx = start_workflow().await;

    // Garbage on payment.chargeback fails to decode in the cancel route;
    // the event must still be acknowledged.
    let before = fx
        .gateway
        .acked_count(STREAM_PAYMENTS, "cancel-on-chargeback")
        .await;
    fx.gateway
        .publish(SUBJECT_PAYMENT_CHARGEBACK, bytes::Bytes::from_static(b"not json"))
        .await
        .unwrap();
    wait_for_acked(&fx.gateway, STREAM_PAYMENTS, "cancel-on-chargeback", before + 1).await;
}
