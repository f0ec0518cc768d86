//! In-memory event gateway for tests and broker-free runs.
//!
//! Uses tokio channels within a single process. Streams retain a bounded
//! history, consumer groups load-balance round-robin across attached
//! instances, and every publish/ack is recorded so tests can assert on the
//! traffic.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use tokio::sync::{mpsc, RwLock};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tracing::debug;

use super::{
    subject, AckToken, DeliverPolicy, Delivery, Event, EventGateway, GatewayError, Result,
    RouteSpec, StreamSpec, Subscription,
};

/// One attached consumer-group instance.
type Instance = mpsc::UnboundedSender<Delivery>;

struct GroupState {
    route: RouteSpec,
    instances: Vec<Instance>,
    next_instance: usize,
    acked: Arc<AtomicUsize>,
}

struct StreamState {
    spec: StreamSpec,
    history: VecDeque<Event>,
    groups: HashMap<String, GroupState>,
}

impl StreamState {
    fn retain_within_bound(&mut self) {
        while self.history.len() as i64 > self.spec.max_messages {
            self.history.pop_front();
        }
    }
}

/// In-process event gateway.
#[derive(Default)]
pub struct MemoryEventGateway {
    streams: RwLock<HashMap<String, StreamState>>,
    published: RwLock<Vec<Event>>,
}

impl MemoryEventGateway {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event published through this gateway, in order.
    pub async fn published(&self) -> Vec<Event> {
        self.published.read().await.clone()
    }

    /// How many events have been published on the given subject.
    pub async fn published_count(&self, subject: &str) -> usize {
        self.published
            .read()
            .await
            .iter()
            .filter(|event| event.subject == subject)
            .count()
    }

    /// How many deliveries the given consumer group has acknowledged.
    pub async fn acked_count(&self, stream: &str, group: &str) -> usize {
        let streams = self.streams.read().await;
        streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|group| group.acked.load(Ordering::SeqCst))
            .unwrap_or(0)
    }

    /// Names of the streams that currently exist.
    pub async fn stream_names(&self) -> Vec<String> {
        self.streams.read().await.keys().cloned().collect()
    }

    /// The reconciled configuration of a consumer group, if it exists.
    pub async fn route_config(&self, stream: &str, group: &str) -> Option<RouteSpec> {
        let streams = self.streams.read().await;
        streams
            .get(stream)
            .and_then(|state| state.groups.get(group))
            .map(|group| group.route.clone())
    }
}

/// Ack handle that bumps the owning group's counter.
struct MemoryAck {
    acked: Arc<AtomicUsize>,
}

#[async_trait]
impl AckToken for MemoryAck {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.acked.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl GroupState {
    /// Deliver to exactly one live instance, round-robin.
    fn deliver(&mut self, event: &Event) {
        self.instances.retain(|instance| !instance.is_closed());
        if self.instances.is_empty() {
            return;
        }

        let index = self.next_instance % self.instances.len();
        self.next_instance = self.next_instance.wrapping_add(1);

        let delivery = Delivery::new(
            event.clone(),
            Box::new(MemoryAck {
                acked: Arc::clone(&self.acked),
            }),
        );
        // A receiver dropped between retain and send just loses this copy;
        // the broker contract makes no promise to a departed instance.
        let _ = self.instances[index].send(delivery);
    }
}

#[async_trait]
impl EventGateway for MemoryEventGateway {
    async fn publish(&self, subject: &str, payload: Bytes) -> Result<()> {
        let event = Event {
            subject: subject.to_string(),
            payload,
        };

        self.published.write().await.push(event.clone());

        let mut streams = self.streams.write().await;
        for state in streams.values_mut() {
            let bound = state
                .spec
                .subjects
                .iter()
                .any(|pattern| subject::matches(subject, pattern));
            if !bound {
                continue;
            }

            state.history.push_back(event.clone());
            state.retain_within_bound();

            for group in state.groups.values_mut() {
                if subject::matches(subject, &group.route.filter_subject) {
                    group.deliver(&event);
                }
            }
        }

        Ok(())
    }

    async fn ensure_stream(&self, spec: &StreamSpec) -> Result<()> {
        let mut streams = self.streams.write().await;
        match streams.get_mut(&spec.name) {
            Some(state) => {
                state.spec = spec.clone();
                state.retain_within_bound();
            }
            None => {
                streams.insert(
                    spec.name.clone(),
                    StreamState {
                        spec: spec.clone(),
                        history: VecDeque::new(),
                        groups: HashMap::new(),
                    },
                );
                debug!(stream = %spec.name, "Stream created");
            }
        }
        Ok(())
    }

    async fn subscribe(&self, stream: &str, route: &RouteSpec) -> Result<Subscription> {
        let mut streams = self.streams.write().await;
        let state = streams.get_mut(stream).ok_or_else(|| {
            GatewayError::Configuration(format!("Unknown stream: {}", stream))
        })?;

        let group = state
            .groups
            .entry(route.group.clone())
            .or_insert_with(|| GroupState {
                route: route.clone(),
                instances: Vec::new(),
                next_instance: 0,
                acked: Arc::new(AtomicUsize::new(0)),
            });
        // Reconciliation overwrites any differing configuration.
        group.route = route.clone();

        let (tx, rx) = mpsc::unbounded_channel();

        if route.deliver_policy == DeliverPolicy::All {
            for event in &state.history {
                if subject::matches(&event.subject, &route.filter_subject) {
                    let _ = tx.send(Delivery::new(
                        event.clone(),
                        Box::new(MemoryAck {
                            acked: Arc::clone(&group.acked),
                        }),
                    ));
                }
            }
        }

        group.instances.push(tx);

        Ok(Subscription {
            stream: stream.to_string(),
            group: route.group.clone(),
            filter_subject: route.filter_subject.clone(),
            deliveries: UnboundedReceiverStream::new(rx).map(Ok).boxed(),
        })
    }
}
