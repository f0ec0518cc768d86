//! Event gateway for publish/subscribe over durable streams.
//!
//! This module contains:
//! - `EventGateway` trait: stream/consumer reconciliation, publishing, and
//!   subscription
//! - `RouteHandler` trait: units of work invoked per delivered event
//! - `Delivery`/`Subscription`: ackable events flowing from a consumer group
//! - Implementations: NATS JetStream, in-memory channels

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use futures::stream::BoxStream;
use serde::de::DeserializeOwned;
use serde::Serialize;

pub mod dispatch;
pub mod memory;
pub mod nats;
pub mod subject;

pub use dispatch::attach;
pub use memory::MemoryEventGateway;
pub use nats::NatsEventGateway;

/// Result type for gateway operations.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Error returned by event handlers bound to routes.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors that can occur during gateway operations.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Stream or consumer reconciliation failed for a reason other than
    /// not-found. Fatal: aborts startup, no retry.
    #[error("configuration failed: {0}")]
    Configuration(String),

    /// Broker connection failure on the publish or subscribe path.
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// An event in transit: a hierarchical dot-delimited subject plus a JSON
/// payload.
#[derive(Debug, Clone)]
pub struct Event {
    pub subject: String,
    pub payload: Bytes,
}

impl Event {
    /// Decode the JSON payload into a request DTO.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.payload)?)
    }

    /// The raw payload as text (lossy UTF-8).
    pub fn payload_text(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

/// Storage durability class for a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageClass {
    /// Durable on-disk storage.
    File,
    /// In-memory storage, lost on broker restart.
    Memory,
}

/// Desired configuration for a durable stream.
#[derive(Debug, Clone)]
pub struct StreamSpec {
    /// Stream name (e.g. "ORDERS").
    pub name: String,
    /// Subject patterns bound to this stream (trailing `>` wildcard allowed).
    pub subjects: Vec<String>,
    /// Storage durability class.
    pub storage: StorageClass,
    /// Retention bound: maximum number of retained messages.
    pub max_messages: i64,
}

/// Which historical events a newly created consumer group may receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliverPolicy {
    /// Only events published after the group was created.
    #[default]
    New,
    /// Replay everything the stream retains.
    All,
}

/// Desired configuration for a durable, competing-consumer group.
#[derive(Debug, Clone)]
pub struct RouteSpec {
    /// Durable group name, unique per stream. All instances subscribing
    /// under this name compete for deliveries.
    pub group: String,
    /// Concrete or wildcarded subject filter within the stream.
    pub filter_subject: String,
    pub deliver_policy: DeliverPolicy,
    /// The server reclaims the group's durable position if no instance has
    /// attached for this long.
    pub inactive_threshold: Duration,
}

/// Acknowledgment handle for a single delivery.
#[async_trait]
pub trait AckToken: Send {
    /// Advance the group's durable position past this event.
    async fn ack(self: Box<Self>) -> Result<()>;
}

/// A single event delivered to a subscription, awaiting acknowledgment.
pub struct Delivery {
    pub event: Event,
    ack: Box<dyn AckToken>,
}

impl Delivery {
    pub(crate) fn new(event: Event, ack: Box<dyn AckToken>) -> Self {
        Self { event, ack }
    }

    /// Acknowledge the event so it is not redelivered.
    pub async fn ack(self) -> Result<()> {
        self.ack.ack().await
    }
}

/// An attached consumer-group instance: a stream of ackable deliveries.
pub struct Subscription {
    pub stream: String,
    pub group: String,
    pub filter_subject: String,
    pub deliveries: BoxStream<'static, Result<Delivery>>,
}

/// Handler invoked once per event delivered to a route.
pub trait RouteHandler: Send + Sync {
    fn handle(&self, event: Event) -> BoxFuture<'static, std::result::Result<(), HandlerError>>;
}

impl<F> RouteHandler for F
where
    F: Fn(Event) -> BoxFuture<'static, std::result::Result<(), HandlerError>> + Send + Sync,
{
    fn handle(&self, event: Event) -> BoxFuture<'static, std::result::Result<(), HandlerError>> {
        self(event)
    }
}

/// Managed connection to the event broker.
///
/// Implementations:
/// - `NatsEventGateway`: NATS JetStream
/// - `MemoryEventGateway`: in-process channels for tests and broker-free runs
#[async_trait]
pub trait EventGateway: Send + Sync {
    /// Emit an event. Returns once the broker has durably accepted the
    /// message; never waits for downstream consumers.
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()>;

    /// Idempotently reconcile a durable stream to the given configuration,
    /// creating it if it does not exist.
    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()>;

    /// Idempotently reconcile the durable consumer group (overwriting any
    /// differing configuration) and attach an instance to it.
    async fn subscribe(&self, stream: &str, route: &RouteSpec) -> Result<Subscription>;
}

/// Serialize a domain payload to canonical JSON and emit it on a subject.
pub async fn publish_json<T>(gateway: &dyn EventGateway, subject: &str, payload: &T) -> Result<()>
where
    T: Serialize + ?Sized,
{
    let bytes = serde_json::to_vec(payload)?;
    gateway.publish(subject, bytes.into()).await
}
