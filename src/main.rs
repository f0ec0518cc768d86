//! Runs the order management demo.
//!
//! With no argument, everything runs in one process. Pass `api` to serve
//! only the HTTP gateway, or `events` to run only the workflow routes;
//! running `events` in several terminals shows deliveries being
//! load-balanced between instances.

use std::sync::Arc;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use orderflow::api::{self, ApiState};
use orderflow::config::{Config, LOG_ENV_VAR};
use orderflow::gateway::{EventGateway, NatsEventGateway};
use orderflow::routes;
use orderflow::services::{
    AnalyticsService, AnalyticsServiceHandler, NotificationService, NotificationServiceHandler,
    OrderRepo, OrderService, OrderServiceHandler, PaymentService, PaymentServiceHandler,
    TransactionRepo,
};
use orderflow::store::NatsKvBucket;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env(LOG_ENV_VAR).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::load(None)?;
    let mode = std::env::args().nth(1).unwrap_or_default();

    let client = async_nats::connect(&config.nats.url).await?;
    let jetstream = async_nats::jetstream::new(client.clone());
    let gateway: Arc<dyn EventGateway> = Arc::new(NatsEventGateway::new(client));

    let order_repo = OrderRepo::new(Arc::new(
        NatsKvBucket::ensure(&jetstream, &config.nats.orders_bucket).await?,
    ));
    order_repo.seed_if_empty().await?;

    let transaction_repo = TransactionRepo::new(Arc::new(
        NatsKvBucket::ensure(&jetstream, &config.nats.transactions_bucket).await?,
    ));
    transaction_repo.seed_if_empty().await?;

    // Service handlers are oblivious to transport; the API and the event
    // routes below share these same instances.
    let payments: Arc<dyn PaymentService> = Arc::new(PaymentServiceHandler::new(
        transaction_repo,
        Arc::clone(&gateway),
    ));
    let orders: Arc<dyn OrderService> = Arc::new(OrderServiceHandler::new(
        order_repo,
        Arc::clone(&gateway),
        Arc::clone(&payments),
    ));
    let notifications: Arc<dyn NotificationService> =
        Arc::new(NotificationServiceHandler::new(Arc::clone(&gateway)));
    let analytics: Arc<dyn AnalyticsService> = Arc::new(AnalyticsServiceHandler::new());

    let (run_api, run_events) = match mode.to_ascii_lowercase().as_str() {
        "api" => (true, false),
        "event" | "events" => (false, true),
        _ => (true, true),
    };

    if run_events {
        routes::run(
            Arc::clone(&gateway),
            &routes::workflow_streams(),
            routes::workflow_routes(
                Arc::clone(&orders),
                Arc::clone(&payments),
                notifications,
                analytics,
            ),
        )
        .await?;
        info!(url = %config.nats.url, "Event gateway now running");
    }

    if run_api {
        let host = config.api.host.clone();
        let port = config.api.port;
        let state = ApiState { orders, payments };
        tokio::spawn(async move {
            if let Err(e) = api::serve(&host, port, state).await {
                error!(error = %e, "API gateway failed");
            }
        });
    }

    info!("Press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}
