//! # Logging subscriber.
//!
//! [`LogWriter`] renders events through `tracing` with structured fields.
//!
//! ## Output (fmt subscriber)
//! ```text
//! INFO  connected endpoint=orders-writer generation=3 attempt=2
//! WARN  connection attempt failed endpoint=orders-writer attempt=1 reason="connection refused: ..."
//! INFO  retry scheduled endpoint=orders-writer attempt=1 delay_ms=60000
//! ERROR connection retries exhausted endpoint=orders-writer attempts=6
//! INFO  checkpoint completed endpoint=orders-writer checkpoint_id=7
//! ```

use async_trait::async_trait;
use tracing::{debug, error, info, warn};

use crate::events::{Event, EventKind};

use super::Subscribe;

/// `tracing`-backed subscriber. Enabled via the `logging` feature.
#[derive(Clone, Copy, Debug, Default)]
pub struct LogWriter;

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let endpoint = e.endpoint.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("");
        match e.kind {
            EventKind::ConnectStarting => {
                debug!(endpoint, attempt = e.attempt, "connecting");
            }
            EventKind::Connected => {
                info!(endpoint, generation = e.generation, attempt = e.attempt, "connected");
            }
            EventKind::ConnectFailed => {
                warn!(endpoint, attempt = e.attempt, reason, "connection attempt failed");
            }
            EventKind::RetryScheduled => {
                info!(endpoint, attempt = e.attempt, delay_ms = e.delay_ms, "retry scheduled");
            }
            EventKind::RetriesExhausted => {
                error!(endpoint, attempts = e.attempt, reason, "connection retries exhausted");
            }
            EventKind::SessionClosed => {
                debug!(endpoint, generation = e.generation, "session closed");
            }
            EventKind::RecordDropped => {
                warn!(endpoint, reason, "record dropped");
            }
            EventKind::MessageDiscarded => {
                warn!(endpoint, message_id = e.message_id.as_deref(), reason, "message discarded");
            }
            EventKind::DuplicateDiscarded => {
                debug!(endpoint, message_id = e.message_id.as_deref(), "duplicate discarded");
            }
            EventKind::CheckpointCompleted => {
                info!(endpoint, checkpoint_id = e.checkpoint_id, "checkpoint completed");
            }
            EventKind::CheckpointRolledBack => {
                info!(endpoint, checkpoint_id = e.checkpoint_id, "replayed cycle rolled back");
            }
            EventKind::CheckpointFailed => {
                error!(endpoint, checkpoint_id = e.checkpoint_id, reason, "checkpoint failed");
            }
            EventKind::ResetApplied => {
                info!(endpoint, checkpoint_id = e.checkpoint_id, "reset applied");
            }
            EventKind::DrainCompleted => {
                info!(endpoint, discarded = e.count, "dedup drain completed");
            }
            EventKind::ConsistencyRequested => {
                debug!(endpoint, messages = e.count, "consistent state requested");
            }
            EventKind::ResetRequested => {
                warn!(endpoint, reason, "region reset requested");
            }
            EventKind::ShutdownRequested => {
                info!(endpoint, "shutdown requested");
            }
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked => {
                warn!(subscriber = endpoint, reason, kind = ?e.kind, "subscriber problem");
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
