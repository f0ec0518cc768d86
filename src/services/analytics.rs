//! Event ingestion for reporting.

use async_trait::async_trait;
use tracing::info;

use super::Result;

/// A single customer/order interaction to record.
#[derive(Debug, Clone)]
pub struct TrackEventRequest {
    /// The subject the event arrived on.
    pub event: String,
    /// The raw JSON payload.
    pub json: String,
}

/// Pretends to ingest a ton of user/usage data for reporting purposes.
#[async_trait]
pub trait AnalyticsService: Send + Sync {
    /// Records a customer/order interaction, making it available for
    /// reporting.
    async fn track_event(&self, req: TrackEventRequest) -> Result<()>;
}

/// Sink-only implementation: it logs what it sees and publishes nothing.
#[derive(Default)]
pub struct AnalyticsServiceHandler;

impl AnalyticsServiceHandler {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl AnalyticsService for AnalyticsServiceHandler {
    async fn track_event(&self, req: TrackEventRequest) -> Result<()> {
        info!(event = %req.event, "Ingesting event for reporting");
        Ok(())
    }
}
