//! # WriterEndpoint: outbound delivery.
//!
//! Two modes, fixed at construction by [`WriterConfig::consistent_region`]:
//!
//! ## Outside a consistent region
//! ```text
//! process(record)
//!   ├─► ensure_connected()              (lazy, retry policy; failure is fatal)
//!   ├─► encode ──Err──► drop record
//!   ├─► send, resending up to resend.max_retries on the same session
//!   └─► on failure: reconnect (retry policy), re-encode, send once
//!          └─ on failure: drop record
//! drop record = failed_inserts += 1, RecordDropped, ErrorPort (if any)
//! ```
//!
//! ## Inside a consistent region
//! The session is transacted and opened at `initialize()` with a single
//! attempt. Send failures propagate to the host, which resets the region.
//! On `checkpoint(seq)` the writer reads back its previous marker from the
//! control queue and either commits the cycle with a new marker or rolls it
//! back (see [`WriterCheckpoint`]).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::checkpoint::{CheckpointMarker, MarkerDecision, WriterCheckpoint};
use crate::codec::{MessageCodec, Record};
use crate::config::WriterConfig;
use crate::core::{Checkpoint, ConnectionSupervisor, DeliveryFailure, ErrorPort, StateHandler};
use crate::error::{BridgeError, ConfigError, ConnectionError};
use crate::events::{Bus, Event, EventKind};
use crate::metrics::{Counter, Gauge, MetricsSink, NoopMetrics};
use crate::policies::{ResendPolicy, RetryPolicy};
use crate::provider::{AckMode, Message, Provider, SessionOptions};

/// How long a checkpoint waits for the previous marker on the control queue.
pub const CONTROL_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

/// Builder for a [`WriterEndpoint`].
pub struct WriterBuilder {
    config: WriterConfig,
    provider: Arc<dyn Provider>,
    codec: Option<Arc<dyn MessageCodec>>,
    errors: Option<Arc<dyn ErrorPort>>,
    metrics: Arc<dyn MetricsSink>,
    bus: Bus,
    token: CancellationToken,
}

impl WriterBuilder {
    pub fn new(config: WriterConfig, provider: Arc<dyn Provider>) -> Self {
        Self {
            config,
            provider,
            codec: None,
            errors: None,
            metrics: Arc::new(NoopMetrics),
            bus: Bus::default(),
            token: CancellationToken::new(),
        }
    }

    /// Uses `codec` instead of the one built from the configured class and schema.
    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Reports dropped records to `errors`.
    pub fn with_error_port(mut self, errors: Arc<dyn ErrorPort>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    /// Cancelling `token` aborts connection attempts, retry sleeps and resend delays.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    /// Validates the configuration and builds the (disconnected) endpoint.
    pub fn build(self) -> Result<WriterEndpoint, ConfigError> {
        let cfg = self.config;
        cfg.validate()?;
        let codec = match self.codec {
            Some(codec) => codec,
            None => cfg.class.codec(&cfg.schema)?,
        };

        let mut options = SessionOptions::new(
            cfg.destination.clone(),
            if cfg.consistent_region {
                AckMode::Transacted
            } else {
                AckMode::Auto
            },
        );
        if let (true, Some(queue)) = (cfg.consistent_region, cfg.control_queue.as_deref()) {
            let selector = CheckpointMarker::selector(&cfg.operator_id);
            options = options.with_control(queue, Some(selector));
        }

        let conn = ConnectionSupervisor::new(
            cfg.operator_id.clone(),
            self.provider,
            options,
            cfg.retry_policy(),
        )
        .with_metrics(Arc::clone(&self.metrics))
        .with_bus(self.bus.clone())
        .with_token(self.token.clone());

        Ok(WriterEndpoint {
            resend: cfg.resend_policy(),
            config: cfg,
            codec,
            conn,
            errors: self.errors,
            metrics: self.metrics,
            bus: self.bus,
            token: self.token,
            state: Mutex::new(WriterCheckpoint::default()),
        })
    }
}

/// Outbound endpoint.
pub struct WriterEndpoint {
    config: WriterConfig,
    resend: ResendPolicy,
    codec: Arc<dyn MessageCodec>,
    conn: ConnectionSupervisor,
    errors: Option<Arc<dyn ErrorPort>>,
    metrics: Arc<dyn MetricsSink>,
    bus: Bus,
    token: CancellationToken,
    state: Mutex<WriterCheckpoint>,
}

impl WriterEndpoint {
    pub fn builder(config: WriterConfig, provider: Arc<dyn Provider>) -> WriterBuilder {
        WriterBuilder::new(config, provider)
    }

    pub fn connection(&self) -> &ConnectionSupervisor {
        &self.conn
    }

    pub fn in_region(&self) -> bool {
        self.config.consistent_region
    }

    /// Last checkpoint this writer completed.
    pub async fn last_checkpoint(&self) -> u64 {
        self.state.lock().await.last_successful()
    }

    /// Opens the transacted session inside a region (single attempt); no-op outside.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        if self.in_region() {
            self.conn.connect_with(RetryPolicy::NoRetry).await?;
        }
        Ok(())
    }

    /// Delivers one record.
    ///
    /// Outside a region only fatal connection errors are returned; failed records
    /// are dropped and reported. Inside a region every send error is returned.
    pub async fn process(&self, record: Record) -> Result<(), BridgeError> {
        if self.in_region() {
            let Some(message) = self.encode(&record, true) else {
                return Ok(());
            };
            self.conn.send(message).await?;
            return Ok(());
        }

        self.conn.ensure_connected().await?;
        let Some(message) = self.encode(&record, true) else {
            return Ok(());
        };
        let Err(first) = self.send_with_resend(message).await else {
            return Ok(());
        };
        if first == ConnectionError::Canceled {
            return Err(first.into());
        }
        warn!(endpoint = self.conn.name(), error = %first, "send failed, reconnecting");

        match self.reconnect_and_send(&record).await {
            Ok(()) => Ok(()),
            Err(ConnectionError::Canceled) => Err(ConnectionError::Canceled.into()),
            Err(err) => {
                self.drop_record(record, err.to_string());
                Ok(())
            }
        }
    }

    /// Cancels pending retries and closes the session.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.bus.publish(
            Event::new(EventKind::ShutdownRequested).with_endpoint(self.conn.name()),
        );
        self.conn.close().await;
    }

    /// Encodes `record`; drops it on failure.
    ///
    /// `count_truncation` avoids double counting on re-encode.
    fn encode(&self, record: &Record, count_truncation: bool) -> Option<Message> {
        match self.codec.encode(record) {
            Ok(encoded) => {
                if encoded.truncated && count_truncation {
                    self.metrics.increment(Counter::TruncatedInserts, 1);
                }
                Some(self.with_properties(Message::new(encoded.body), record))
            }
            Err(err) => {
                self.drop_record(record.clone(), err.to_string());
                None
            }
        }
    }

    /// Copies mapped record fields onto message properties; unusable fields are skipped.
    fn with_properties(&self, mut message: Message, record: &Record) -> Message {
        for m in &self.config.properties {
            let Some(value) = record.get(&m.field) else {
                debug!(endpoint = self.conn.name(), field = %m.field, "property field missing");
                continue;
            };
            match m.kind.coerce(value) {
                Some(value) => {
                    message.properties.insert(m.property.clone(), value);
                }
                None => warn!(
                    endpoint = self.conn.name(),
                    property = %m.property,
                    expected = m.kind.name(),
                    found = value.type_name(),
                    "property value not convertible, skipped"
                ),
            }
        }
        message
    }

    async fn send_with_resend(&self, message: Message) -> Result<(), ConnectionError> {
        let mut resent = 0;
        loop {
            let err = match self.conn.send(message.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };
            let Some(delay) = self.resend.next_delay(resent) else {
                return Err(err);
            };
            resent += 1;
            debug!(endpoint = self.conn.name(), resent, error = %err, "resending message");

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = self.token.cancelled() => return Err(ConnectionError::Canceled),
            }
        }
    }

    async fn reconnect_and_send(&self, record: &Record) -> Result<(), ConnectionError> {
        self.conn.reconnect().await?;
        match self.encode(record, false) {
            Some(message) => self.conn.send(message).await,
            None => Ok(()),
        }
    }

    fn drop_record(&self, record: Record, reason: String) {
        self.metrics.increment(Counter::FailedInserts, 1);
        warn!(endpoint = self.conn.name(), reason = %reason, "record dropped");
        self.bus.publish(
            Event::new(EventKind::RecordDropped)
                .with_endpoint(self.conn.name())
                .with_reason(reason.as_str()),
        );
        if let Some(errors) = &self.errors {
            errors.report(DeliveryFailure::for_record(record, reason));
        }
    }

    /// Rolls back the transaction; a dead session is replaced (its work is discarded either way).
    async fn discard_transaction(&self) -> Result<(), ConnectionError> {
        match self.conn.rollback().await {
            Ok(()) => Ok(()),
            Err(err) if !err.is_fatal() => {
                warn!(
                    endpoint = self.conn.name(),
                    error = %err,
                    "rollback failed, reopening session"
                );
                self.conn.connect_with(RetryPolicy::NoRetry).await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }

    async fn take_checkpoint(
        &self,
        state: &mut WriterCheckpoint,
        id: u64,
    ) -> Result<MarkerDecision, BridgeError> {
        let found = self
            .conn
            .receive_control(CONTROL_RECEIVE_TIMEOUT)
            .await?
            .map(|m| CheckpointMarker::from_message(&m))
            .transpose()?;

        let decision = state.decide(id, found.as_ref())?;
        match decision {
            MarkerDecision::Rollback => self.conn.rollback().await?,
            MarkerDecision::Commit => {
                let marker = CheckpointMarker::new(self.config.operator_id.as_str(), id);
                self.conn.send_control(marker.to_message()).await?;
                self.conn.commit().await?;
            }
        }
        state.complete(id);
        Ok(decision)
    }
}

#[async_trait]
impl StateHandler for WriterEndpoint {
    async fn checkpoint(&self, checkpoint: &mut Checkpoint) -> Result<(), BridgeError> {
        if !self.in_region() {
            return Ok(());
        }
        let id = checkpoint.sequence_id();
        let mut state = self.state.lock().await;

        match self.take_checkpoint(&mut state, id).await {
            Ok(decision) => {
                let kind = match decision {
                    MarkerDecision::Commit => EventKind::CheckpointCompleted,
                    MarkerDecision::Rollback => EventKind::CheckpointRolledBack,
                };
                self.metrics
                    .set(Gauge::LastCheckpointId, i64::try_from(id).unwrap_or(i64::MAX));
                self.bus.publish(
                    Event::new(kind)
                        .with_endpoint(self.conn.name())
                        .with_checkpoint(id),
                );
                Ok(())
            }
            Err(err) => {
                self.bus.publish(
                    Event::new(EventKind::CheckpointFailed)
                        .with_endpoint(self.conn.name())
                        .with_checkpoint(id)
                        .with_reason(err.to_string()),
                );
                Err(err)
            }
        }
    }

    async fn drain(&self) -> Result<(), BridgeError> {
        debug!(endpoint = self.conn.name(), "drain");
        Ok(())
    }

    async fn reset(&self, checkpoint: &Checkpoint) -> Result<(), BridgeError> {
        if !self.in_region() {
            return Ok(());
        }
        let id = checkpoint.sequence_id();
        let mut state = self.state.lock().await;
        self.discard_transaction().await?;
        state.reset_to(id);
        self.bus.publish(
            Event::new(EventKind::ResetApplied)
                .with_endpoint(self.conn.name())
                .with_checkpoint(id),
        );
        Ok(())
    }

    async fn reset_to_initial_state(&self) -> Result<(), BridgeError> {
        if !self.in_region() {
            return Ok(());
        }
        let mut state = self.state.lock().await;
        self.discard_transaction().await?;
        state.reset_to(0);
        self.bus
            .publish(Event::new(EventKind::ResetApplied).with_endpoint(self.conn.name()));
        Ok(())
    }

    async fn retire_checkpoint(&self, id: u64) -> Result<(), BridgeError> {
        debug!(endpoint = self.conn.name(), checkpoint_id = id, "checkpoint retired");
        Ok(())
    }
}
