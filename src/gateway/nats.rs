//! NATS JetStream event gateway implementation.

use async_nats::jetstream::{
    self,
    consumer::pull::Config as ConsumerConfig,
    stream::{Config as StreamConfig, RetentionPolicy, StorageType},
    Context,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tracing::{debug, info};

use super::{
    AckToken, DeliverPolicy, Delivery, Event, EventGateway, GatewayError, Result, RouteSpec,
    StorageClass, StreamSpec, Subscription,
};

/// Event gateway backed by NATS JetStream.
///
/// Streams are durable logs keyed by subject pattern; consumer groups are
/// durable pull consumers whose deliveries the broker load-balances across
/// every attached instance.
pub struct NatsEventGateway {
    jetstream: Context,
}

impl NatsEventGateway {
    /// Wrap an existing NATS client.
    pub fn new(client: async_nats::Client) -> Self {
        Self {
            jetstream: jetstream::new(client),
        }
    }

    /// Connect to the broker at the given URL.
    pub async fn connect(url: &str) -> Result<Self> {
        let client = async_nats::connect(url)
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to connect to NATS: {}", e)))?;
        Ok(Self::new(client))
    }
}

impl From<StorageClass> for StorageType {
    fn from(class: StorageClass) -> Self {
        match class {
            StorageClass::File => StorageType::File,
            StorageClass::Memory => StorageType::Memory,
        }
    }
}

impl From<DeliverPolicy> for jetstream::consumer::DeliverPolicy {
    fn from(policy: DeliverPolicy) -> Self {
        match policy {
            DeliverPolicy::New => jetstream::consumer::DeliverPolicy::New,
            DeliverPolicy::All => jetstream::consumer::DeliverPolicy::All,
        }
    }
}

/// Ack handle wrapping a JetStream message.
struct NatsAck {
    message: jetstream::Message,
}

#[async_trait]
impl AckToken for NatsAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.message
            .ack()
            .await
            .map_err(|e| GatewayError::Transport(format!("Failed to ack message: {}", e)))
    }
}

#[async_trait]
impl EventGateway for NatsEventGateway {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        self.jetstream
            .publish(subject.to_string(), payload)
            .await
            .map_err(|e| GatewayError::Transport(format!("Publish failed: {}", e)))?
            .await
            .map_err(|e| GatewayError::Transport(format!("Publish ack failed: {}", e)))?;

        debug!(subject = %subject, "Published event");
        Ok(())
    }

    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()> {
        let config = StreamConfig {
            name: spec.name.clone(),
            subjects: spec.subjects.clone(),
            retention: RetentionPolicy::Limits,
            storage: spec.storage.into(),
            max_messages: spec.max_messages,
            ..Default::default()
        };

        // Update first so repeated startups reconcile the configuration;
        // fall back to create when the stream does not exist yet. An update
        // failure against an existing stream is fatal.
        match self.jetstream.update_stream(&config).await {
            Ok(_) => {
                debug!(stream = %spec.name, "Stream configuration reconciled");
                Ok(())
            }
            Err(update_err) => match self.jetstream.get_stream(&spec.name).await {
                Ok(_) => Err(GatewayError::Configuration(format!(
                    "Failed to reconcile stream {}: {}",
                    spec.name, update_err
                ))),
                Err(_) => {
                    self.jetstream.create_stream(config).await.map_err(|e| {
                        GatewayError::Configuration(format!(
                            "Failed to create stream {}: {}",
                            spec.name, e
                        ))
                    })?;
                    info!(stream = %spec.name, subjects = ?spec.subjects, "Stream created");
                    Ok(())
                }
            },
        }
    }

    async fn subscribe(&self, stream: &str, route: &RouteSpec) -> Result<Subscription> {
        let js_stream = self.jetstream.get_stream(stream).await.map_err(|e| {
            GatewayError::Configuration(format!("Failed to get stream {}: {}", stream, e))
        })?;

        // create_consumer is create-or-update: an existing group with a
        // differing configuration is silently overwritten server-side.
        let consumer = js_stream
            .create_consumer(ConsumerConfig {
                durable_name: Some(route.group.clone()),
                filter_subject: route.filter_subject.clone(),
                deliver_policy: route.deliver_policy.into(),
                inactive_threshold: route.inactive_threshold,
                ..Default::default()
            })
            .await
            .map_err(|e| {
                GatewayError::Configuration(format!(
                    "Failed to create consumer {}: {}",
                    route.group, e
                ))
            })?;

        let messages = consumer.messages().await.map_err(|e| {
            GatewayError::Transport(format!("Failed to open message stream: {}", e))
        })?;

        let deliveries = messages
            .map(|next| {
                next.map(|message| {
                    let event = Event {
                        subject: message.subject.to_string(),
                        payload: message.payload.clone(),
                    };
                    Delivery::new(event, Box::new(NatsAck { message }))
                })
                .map_err(|e| GatewayError::Transport(format!("Failed to receive message: {}", e)))
            })
            .boxed();

        Ok(Subscription {
            stream: stream.to_string(),
            group: route.group.clone(),
            filter_subject: route.filter_subject.clone(),
            deliveries,
        })
    }
}
