//! NATS JetStream gateway integration tests using testcontainers.
//!
//! Run with: cargo test --test gateway_nats -- --nocapture
//!
//! These tests spin up NATS with JetStream in a container.

use std::time::Duration;

use futures::FutureExt;
use orderflow::gateway::{
    attach, DeliverPolicy, Event, EventGateway, HandlerError, NatsEventGateway, RouteHandler,
    RouteSpec, StorageClass, StreamSpec,
};
use std::sync::Arc;
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    GenericImage, ImageExt,
};
use tokio::sync::mpsc;

/// Start NATS container with JetStream enabled.
async fn start_nats() -> (
    testcontainers::ContainerAsync<GenericImage>,
    async_nats::Client,
) {
    let image = GenericImage::new("nats", "2.10")
        .with_exposed_port(4222.tcp())
        .with_wait_for(WaitFor::message_on_stderr(
            "Listening for client connections",
        ))
        .with_cmd(vec!["-js"]); // Enable JetStream

    let container = image
        .with_startup_timeout(Duration::from_secs(60))
        .start()
        .await
        .expect("Failed to start NATS container");

    let host_port = container
        .get_host_port_ipv4(4222)
        .await
        .expect("Failed to get mapped port");

    let host = container
        .get_host()
        .await
        .expect("Failed to get container host");

    let url = format!("nats://{}:{}", host, host_port);
    println!("NATS available at: {}", url);

    let client = async_nats::connect(&url)
        .await
        .expect("Failed to connect to NATS");

    (container, client)
}

fn orders_stream() -> StreamSpec {
    StreamSpec {
        name: "ORDERS".to_string(),
        subjects: vec!["order.>".to_string()],
        storage: StorageClass::File,
        max_messages: 10,
    }
}

fn route(group: &str, filter: &str) -> RouteSpec {
    RouteSpec {
        group: group.to_string(),
        filter_subject: filter.to_string(),
        deliver_policy: DeliverPolicy::New,
        inactive_threshold: Duration::from_secs(600),
    }
}

/// Handler that forwards each delivered subject to a channel.
fn recording_handler(tx: mpsc::UnboundedSender<String>) -> Arc<dyn RouteHandler> {
    Arc::new(move |event: Event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event.subject);
            Ok::<(), HandlerError>(())
        }
        .boxed()
    })
}

/// Handler that records the subject and then fails.
fn failing_handler(tx: mpsc::UnboundedSender<String>) -> Arc<dyn RouteHandler> {
    Arc::new(move |event: Event| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(event.subject.clone());
            Err::<(), HandlerError>(format!("rejecting {}", event.subject).into())
        }
        .boxed()
    })
}

async fn recv_subject(rx: &mut mpsc::UnboundedReceiver<String>) -> String {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for delivery")
        .expect("delivery channel closed")
}

#[tokio::test]
async fn test_ensure_stream_is_idempotent() {
    let (_container, client) = start_nats().await;
    let gateway = NatsEventGateway::new(client);

    let spec = orders_stream();
    gateway.ensure_stream(&spec).await.expect("first ensure");
    gateway.ensure_stream(&spec).await.expect("second ensure");

    gateway
        .publish("order.placed", bytes::Bytes::from_static(b"{}"))
        .await
        .expect("publish after reconcile");
}

#[tokio::test]
async fn test_publish_and_dispatch_with_wildcard_filter() {
    let (_container, client) = start_nats().await;
    let gateway = NatsEventGateway::new(client);
    gateway.ensure_stream(&orders_stream()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = gateway
        .subscribe("ORDERS", &route("workers", "order.>"))
        .await
        .unwrap();
    attach(subscription, recording_handler(tx));

    gateway
        .publish("order.placed", bytes::Bytes::from_static(b"{}"))
        .await
        .unwrap();
    gateway
        .publish("order.cancelled", bytes::Bytes::from_static(b"{}"))
        .await
        .unwrap();

    assert_eq!(recv_subject(&mut rx).await, "order.placed");
    assert_eq!(recv_subject(&mut rx).await, "order.cancelled");
}

#[tokio::test]
async fn test_concrete_filter_excludes_other_subjects() {
    let (_container, client) = start_nats().await;
    let gateway = NatsEventGateway::new(client);
    gateway.ensure_stream(&orders_stream()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = gateway
        .subscribe("ORDERS", &route("placed-only", "order.placed"))
        .await
        .unwrap();
    attach(subscription, recording_handler(tx));

    gateway
        .publish("order.cancelled", bytes::Bytes::from_static(b"{}"))
        .await
        .unwrap();
    gateway
        .publish("order.placed", bytes::Bytes::from_static(b"{}"))
        .await
        .unwrap();

    // Only the matching subject comes through.
    assert_eq!(recv_subject(&mut rx).await, "order.placed");
    let extra = tokio::time::timeout(Duration::from_millis(500), rx.recv()).await;
    assert!(extra.is_err(), "filtered-out subject was delivered");
}

#[tokio::test]
async fn test_handler_failure_does_not_stop_dispatch() {
    let (_container, client) = start_nats().await;
    let gateway = NatsEventGateway::new(client);
    gateway.ensure_stream(&orders_stream()).await.unwrap();

    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = gateway
        .subscribe("ORDERS", &route("failing", "order.>"))
        .await
        .unwrap();
    attach(subscription, failing_handler(tx));

    gateway
        .publish("order.placed", bytes::Bytes::from_static(b"{}"))
        .await
        .unwrap();
    gateway
        .publish("order.shipped", bytes::Bytes::from_static(b"{}"))
        .await
        .unwrap();

    // The second event arrives even though the first handler call failed.
    assert_eq!(recv_subject(&mut rx).await, "order.placed");
    assert_eq!(recv_subject(&mut rx).await, "order.shipped");
}

#[tokio::test]
async fn test_subscribe_reconciles_existing_group() {
    let (_container, client) = start_nats().await;
    let gateway = NatsEventGateway::new(client);
    gateway.ensure_stream(&orders_stream()).await.unwrap();

    let _first = gateway
        .subscribe("ORDERS", &route("workers", "order.placed"))
        .await
        .expect("initial subscribe");

    // Differing filter on the same durable group overwrites silently.
    let second = gateway
        .subscribe("ORDERS", &route("workers", "order.cancelled"))
        .await
        .expect("reconciling subscribe");
    assert_eq!(second.filter_subject, "order.cancelled");
}

#[tokio::test]
async fn test_subscribe_to_missing_stream_fails() {
    let (_container, client) = start_nats().await;
    let gateway = NatsEventGateway::new(client);

    let result = gateway
        .subscribe("MISSING", &route("workers", "order.>"))
        .await;
    assert!(result.is_err());
}
