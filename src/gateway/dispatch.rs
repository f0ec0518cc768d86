//! Per-subscription dispatch loop.
//!
//! Converts the transport's at-least-once delivery into a single-attempt
//! policy: each event is handed to the handler exactly once and then
//! acknowledged no matter what the handler did. Handler failures are logged
//! with subject and group context and swallowed; they never reach the
//! subscription loop and never trigger redelivery.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{RouteHandler, Subscription};

/// Attach a handler to a subscription and start its dispatch loop.
///
/// The loop runs until the subscription's delivery stream ends, which
/// happens when the broker connection is dropped. In-flight handler work is
/// abandoned at that point; there is no drain protocol.
pub fn attach(mut subscription: Subscription, handler: Arc<dyn RouteHandler>) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            stream = %subscription.stream,
            group = %subscription.group,
            filter = %subscription.filter_subject,
            "Route attached"
        );

        while let Some(next) = subscription.deliveries.next().await {
            let delivery = match next {
                Ok(delivery) => delivery,
                Err(e) => {
                    warn!(group = %subscription.group, error = %e, "Failed to receive event");
                    continue;
                }
            };

            debug!(
                subject = %delivery.event.subject,
                group = %subscription.group,
                "Handling event"
            );

            if let Err(e) = handler.handle(delivery.event.clone()).await {
                error!(
                    subject = %delivery.event.subject,
                    group = %subscription.group,
                    error = %e,
                    "Event handler failed"
                );
            }

            // Single-attempt policy: the event is consumed either way.
            if let Err(e) = delivery.ack().await {
                warn!(group = %subscription.group, error = %e, "Failed to ack event");
            }
        }

        debug!(group = %subscription.group, "Subscription closed");
    })
}
