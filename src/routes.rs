//! Declarative wiring of the order workflow.
//!
//! Streams capture the subject spaces the workflow cares about, and routes
//! bind consumer groups within those streams to service handlers. The
//! workflow logic lives entirely in this table: services never subscribe to
//! anything themselves.

use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinHandle;
use tracing::info;

use crate::gateway::{
    attach, subject, DeliverPolicy, EventGateway, GatewayError, HandlerError, RouteHandler,
    RouteSpec, StorageClass, StreamSpec,
};
use crate::services::orders::{self, CancelOrderRequest};
use crate::services::payments::{self, RefundRequest};
use crate::services::{
    notifications, AnalyticsService, NotificationService, OrderService, PaymentService,
    TrackEventRequest,
};

pub const STREAM_ORDERS: &str = "ORDERS";
pub const STREAM_PAYMENTS: &str = "PAYMENTS";
pub const STREAM_NOTIFICATIONS: &str = "NOTIFICATIONS";

/// How many events each workflow stream retains.
pub const WORKFLOW_RETAINED_EVENTS: i64 = 10;

/// The broker reclaims a consumer group's durable state after this long
/// without any attached instance.
pub const ROUTE_INACTIVITY: Duration = Duration::from_secs(14 * 24 * 60 * 60);

/// One binding of a consumer group to a handler within a stream.
pub struct EventRoute {
    pub stream: &'static str,
    pub subject: String,
    pub group: &'static str,
    pub handler: Arc<dyn RouteHandler>,
}

/// The durable streams backing the order workflow.
pub fn workflow_streams() -> Vec<StreamSpec> {
    let stream = |name: &str, pattern: &str| StreamSpec {
        name: name.to_string(),
        subjects: vec![pattern.to_string()],
        storage: StorageClass::File,
        max_messages: WORKFLOW_RETAINED_EVENTS,
    };

    vec![
        stream(STREAM_ORDERS, "order.>"),
        stream(STREAM_PAYMENTS, "payment.>"),
        stream(STREAM_NOTIFICATIONS, "notification.>"),
    ]
}

fn analytics_route(
    stream: &'static str,
    filter: &str,
    group: &'static str,
    analytics: Arc<dyn AnalyticsService>,
) -> EventRoute {
    EventRoute {
        stream,
        subject: filter.to_string(),
        group,
        handler: Arc::new(move |event: crate::gateway::Event| {
            let analytics = Arc::clone(&analytics);
            async move {
                analytics
                    .track_event(TrackEventRequest {
                        event: event.subject.clone(),
                        json: event.payload_text(),
                    })
                    .await?;
                Ok::<(), HandlerError>(())
            }
            .boxed()
        }),
    }
}

/// The full workflow route table.
pub fn workflow_routes(
    order_service: Arc<dyn OrderService>,
    payment_service: Arc<dyn PaymentService>,
    notification_service: Arc<dyn NotificationService>,
    analytics_service: Arc<dyn AnalyticsService>,
) -> Vec<EventRoute> {
    // Send a confirmation message when an order is placed.
    let notify_placed = {
        let notifications = Arc::clone(&notification_service);
        EventRoute {
            stream: STREAM_ORDERS,
            subject: orders::SUBJECT_ORDER_PLACED.to_string(),
            group: "notify-on-placed",
            handler: Arc::new(move |event: crate::gateway::Event| {
                let notifications = Arc::clone(&notifications);
                async move {
                    let req: notifications::OrderNotificationRequest = event.decode()?;
                    notifications.send_order_placed_message(req).await?;
                    Ok::<(), HandlerError>(())
                }
                .boxed()
            }),
        }
    };

    // Send a confirmation message when an order is cancelled.
    let notify_cancelled = {
        let notifications = Arc::clone(&notification_service);
        EventRoute {
            stream: STREAM_ORDERS,
            subject: orders::SUBJECT_ORDER_CANCELLED.to_string(),
            group: "notify-on-cancelled",
            handler: Arc::new(move |event: crate::gateway::Event| {
                let notifications = Arc::clone(&notifications);
                async move {
                    let req: notifications::OrderNotificationRequest = event.decode()?;
                    notifications.send_order_cancelled_message(req).await?;
                    Ok::<(), HandlerError>(())
                }
                .boxed()
            }),
        }
    };

    // Refund the payment when an order is cancelled.
    let refund_on_cancel = {
        let payments = Arc::clone(&payment_service);
        EventRoute {
            stream: STREAM_ORDERS,
            subject: orders::SUBJECT_ORDER_CANCELLED.to_string(),
            group: "refund-on-cancel",
            handler: Arc::new(move |event: crate::gateway::Event| {
                let payments = Arc::clone(&payments);
                async move {
                    let req: RefundRequest = event.decode()?;
                    payments.refund(req).await?;
                    Ok::<(), HandlerError>(())
                }
                .boxed()
            }),
        }
    };

    // When the card company reports a chargeback, cancel the order.
    let cancel_on_chargeback = {
        let orders_service = Arc::clone(&order_service);
        EventRoute {
            stream: STREAM_PAYMENTS,
            subject: payments::SUBJECT_PAYMENT_CHARGEBACK.to_string(),
            group: "cancel-on-chargeback",
            handler: Arc::new(move |event: crate::gateway::Event| {
                let orders_service = Arc::clone(&orders_service);
                async move {
                    let req: CancelOrderRequest = event.decode()?;
                    orders_service.cancel_order(req).await?;
                    Ok::<(), HandlerError>(())
                }
                .boxed()
            }),
        }
    };

    vec![
        notify_placed,
        notify_cancelled,
        refund_on_cancel,
        // Everything goes to the analytics service.
        analytics_route(
            STREAM_ORDERS,
            "order.>",
            "analytics-orders",
            Arc::clone(&analytics_service),
        ),
        cancel_on_chargeback,
        analytics_route(
            STREAM_PAYMENTS,
            "payment.>",
            "analytics-payments",
            Arc::clone(&analytics_service),
        ),
        analytics_route(
            STREAM_NOTIFICATIONS,
            "notification.>",
            "analytics-notifications",
            analytics_service,
        ),
    ]
}

/// Reconcile the streams, bind every route, and start its dispatch loop.
///
/// Fails fast on the first configuration problem; a partially wired
/// workflow is not allowed to run.
pub async fn run(
    gateway: Arc<dyn EventGateway>,
    streams: &[StreamSpec],
    routes: Vec<EventRoute>,
) -> crate::gateway::Result<Vec<JoinHandle<()>>> {
    for spec in streams {
        gateway.ensure_stream(spec).await?;
    }

    let mut tasks = Vec::with_capacity(routes.len());
    for route in routes {
        let stream = streams
            .iter()
            .find(|spec| spec.name == route.stream)
            .ok_or_else(|| {
                GatewayError::Configuration(format!(
                    "Route group {} references unknown stream {}",
                    route.group, route.stream
                ))
            })?;

        let in_bounds = stream
            .subjects
            .iter()
            .any(|pattern| subject::covers(pattern, &route.subject));
        if !in_bounds {
            return Err(GatewayError::Configuration(format!(
                "Route filter {} falls outside stream {}'s subject space",
                route.subject, route.stream
            )));
        }

        let spec = RouteSpec {
            group: route.group.to_string(),
            filter_subject: route.subject.clone(),
            deliver_policy: DeliverPolicy::New,
            inactive_threshold: ROUTE_INACTIVITY,
        };
        let subscription = gateway.subscribe(route.stream, &spec).await?;
        tasks.push(attach(subscription, route.handler));
    }

    info!(routes = tasks.len(), "Workflow routes running");
    Ok(tasks)
}
