//! # ReaderEndpoint: inbound delivery.
//!
//! One logical loop per reader. Each cycle handles at most one message:
//!
//! ```text
//! poll_once()
//!   ├─► acquire region permit            (region only; cancellable)
//!   ├─► ack due? ─► acknowledge, clear   (ack failure → request_reset)
//!   ├─► receive(receive_timeout)         (cancellable)
//!   │      ├─ None ─► Idle
//!   │      └─ Err  ─► outside a region: reconnect under the retry policy
//!   │                 inside a region: release permit, request_reset,
//!   │                 one reconnect attempt, else park until reset()
//!   ├─► messages_read += 1
//!   ├─► redelivery of an emitted message? ─► DuplicateDiscarded
//!   ├─► decode ─► OutputPort / DiscardReason
//!   └─► track, count toward trigger_count ─► make_consistent
//! ```
//!
//! ## Rules
//! - Outside a region the session auto-acknowledges and no tracking is kept.
//! - Inside a region the session is client-acknowledged; messages are only
//!   acknowledged on the first cycle after a checkpoint.
//! - The tracker lock is taken before any session operation and held for the
//!   whole cycle, so host callbacks never observe a half-processed message.
//! - Inside a region the reader never retries a broken session on its own:
//!   recovery belongs to the host's reset. A parked reader waits for that reset
//!   without holding the permit.
//! - `reset` waits for the outcome of the initial connection.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::{Mutex, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::checkpoint::{DeliveryTracker, ReaderSnapshot, drain_duplicates};
use crate::codec::{DiscardReason, MessageCodec, Record};
use crate::config::ReaderConfig;
use crate::core::{
    Checkpoint, ConnectionSupervisor, DeliveryFailure, ErrorPort, OutputPort, RegionContext,
    StateHandler,
};
use crate::error::{BridgeError, ConfigError, ConnectionError};
use crate::events::{Bus, Event, EventKind};
use crate::metrics::{Counter, Gauge, MetricsSink, NoopMetrics};
use crate::policies::RetryPolicy;
use crate::provider::{AckMode, Message, Provider, SessionOptions, Value};

/// Result of one reader cycle.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Cycle {
    /// A record was submitted to the output port.
    Emitted,
    /// The message could not be decoded and was dropped.
    Dropped(DiscardReason),
    /// A redelivered message that was already emitted.
    Duplicate,
    /// Nothing arrived within the receive timeout.
    Idle,
    /// The session failed and was replaced.
    Reconnected,
    /// The session failed inside a region and could not be replaced; the
    /// reader waits for the host's reset.
    ResetPending,
    /// Shutdown was requested or the region closed.
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Initial {
    Pending,
    Established,
    Failed,
}

/// Builder for a [`ReaderEndpoint`].
pub struct ReaderBuilder {
    config: ReaderConfig,
    provider: Arc<dyn Provider>,
    output: Arc<dyn OutputPort>,
    region: Option<Arc<dyn RegionContext>>,
    codec: Option<Arc<dyn MessageCodec>>,
    errors: Option<Arc<dyn ErrorPort>>,
    metrics: Arc<dyn MetricsSink>,
    bus: Bus,
    token: CancellationToken,
}

impl ReaderBuilder {
    pub fn new(
        config: ReaderConfig,
        provider: Arc<dyn Provider>,
        output: Arc<dyn OutputPort>,
    ) -> Self {
        Self {
            config,
            provider,
            output,
            region: None,
            codec: None,
            errors: None,
            metrics: Arc::new(NoopMetrics),
            bus: Bus::default(),
            token: CancellationToken::new(),
        }
    }

    /// Region context; required when the config is in a consistent region.
    pub fn with_region(mut self, region: Arc<dyn RegionContext>) -> Self {
        self.region = Some(region);
        self
    }

    pub fn with_codec(mut self, codec: Arc<dyn MessageCodec>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Reports undecodable messages to `errors`.
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

    /// Cancelling `token` stops the loop and interrupts connection attempts.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn build(self) -> Result<ReaderEndpoint, ConfigError> {
        let cfg = self.config;
        cfg.validate()?;
        match (&self.region, cfg.consistent_region) {
            (None, true) => {
                return Err(ConfigError::invalid(
                    "consistent_region",
                    "a region context is required",
                ));
            }
            (Some(_), false) => {
                return Err(ConfigError::invalid(
                    "consistent_region",
                    "region context given but the reader is not in a region",
                ));
            }
            (Some(region), true) if region.is_trigger() && cfg.trigger_count.is_none() => {
                return Err(ConfigError::invalid(
                    "trigger_count",
                    "required when the reader triggers the region",
                ));
            }
            _ => {}
        }
        let codec = match self.codec {
            Some(codec) => codec,
            None => cfg.class.codec(&cfg.schema)?,
        };

        let ack_mode = if cfg.consistent_region {
            AckMode::Client
        } else {
            AckMode::Auto
        };
        let options = SessionOptions::new(cfg.destination.clone(), ack_mode)
            .with_selector(cfg.selector.clone());
        let conn = ConnectionSupervisor::new(
            cfg.operator_id.clone(),
            self.provider,
            options,
            cfg.retry_policy(),
        )
        .with_metrics(Arc::clone(&self.metrics))
        .with_bus(self.bus.clone())
        .with_token(self.token.clone());

        let (initial, _) = watch::channel(Initial::Pending);
        let (reset_pending, _) = watch::channel(false);
        Ok(ReaderEndpoint {
            config: cfg,
            codec,
            conn,
            region: self.region,
            output: self.output,
            errors: self.errors,
            metrics: self.metrics,
            bus: self.bus,
            token: self.token,
            tracker: Mutex::new(DeliveryTracker::default()),
            initial,
            reset_pending,
        })
    }
}

/// Inbound endpoint.
pub struct ReaderEndpoint {
    config: ReaderConfig,
    codec: Arc<dyn MessageCodec>,
    conn: ConnectionSupervisor,
    region: Option<Arc<dyn RegionContext>>,
    output: Arc<dyn OutputPort>,
    errors: Option<Arc<dyn ErrorPort>>,
    metrics: Arc<dyn MetricsSink>,
    bus: Bus,
    token: CancellationToken,
    tracker: Mutex<DeliveryTracker>,
    initial: watch::Sender<Initial>,
    /// Set while a region reset is owed after a session failure.
    reset_pending: watch::Sender<bool>,
}

impl ReaderEndpoint {
    pub fn builder(
        config: ReaderConfig,
        provider: Arc<dyn Provider>,
        output: Arc<dyn OutputPort>,
    ) -> ReaderBuilder {
        ReaderBuilder::new(config, provider, output)
    }

    pub fn connection(&self) -> &ConnectionSupervisor {
        &self.conn
    }

    pub fn in_region(&self) -> bool {
        self.region.is_some()
    }

    /// Makes the initial connection under the retry policy.
    ///
    /// Its outcome is published to pending `reset` calls; calling it again after
    /// it succeeded is a no-op.
    pub async fn initialize(&self) -> Result<(), BridgeError> {
        if *self.initial.borrow() == Initial::Established {
            return Ok(());
        }
        match self.conn.connect().await {
            Ok(_) => {
                self.initial.send_replace(Initial::Established);
                Ok(())
            }
            Err(err) => {
                self.initial.send_replace(Initial::Failed);
                Err(err.into())
            }
        }
    }

    /// Runs the loop until the token is cancelled, the region closes or a fatal error occurs.
    pub async fn run(&self) -> Result<(), BridgeError> {
        self.initialize().await?;
        info!(endpoint = self.conn.name(), region = self.in_region(), "reader started");
        loop {
            if self.poll_once().await? == Cycle::Stopped {
                break;
            }
        }
        info!(endpoint = self.conn.name(), "reader stopped");
        Ok(())
    }

    /// Runs one cycle of the loop.
    pub async fn poll_once(&self) -> Result<Cycle, BridgeError> {
        if self.token.is_cancelled() || !self.wait_reset().await {
            return Ok(Cycle::Stopped);
        }
        let permit = match &self.region {
            Some(region) => select! {
                permit = region.acquire_permit() => match permit {
                    Some(permit) => Some(permit),
                    None => return Ok(Cycle::Stopped),
                },
                _ = self.token.cancelled() => return Ok(Cycle::Stopped),
            },
            None => None,
        };

        let mut tracker = self.tracker.lock().await;
        if tracker.ack_due() {
            if let Err(err) = self.conn.acknowledge().await {
                warn!(
                    endpoint = self.conn.name(),
                    error = %err,
                    "acknowledge after checkpoint failed"
                );
                self.request_reset(&err);
            }
            tracker.clear();
        }

        let received = select! {
            res = self.conn.receive(self.config.receive_timeout) => res,
            _ = self.token.cancelled() => return Ok(Cycle::Stopped),
        };
        match received {
            Ok(Some(message)) => self.handle(&mut tracker, message),
            Ok(None) => Ok(Cycle::Idle),
            Err(err) if self.in_region() => {
                drop(permit);
                let cycle = self.recover_in_region(err).await;
                drop(tracker);
                cycle
            }
            Err(err) => {
                drop(tracker);
                self.recover_session(err).await
            }
        }
    }

    /// Cancels the loop and closes the session.
    pub async fn shutdown(&self) {
        self.token.cancel();
        self.bus.publish(
            Event::new(EventKind::ShutdownRequested).with_endpoint(self.conn.name()),
        );
        self.conn.close().await;
    }

    fn handle(
        &self,
        tracker: &mut DeliveryTracker,
        message: Message,
    ) -> Result<Cycle, BridgeError> {
        self.metrics.increment(Counter::MessagesRead, 1);
        let generation = self.conn.generation();

        if self.in_region() && tracker.is_redelivery(generation, &message) {
            self.metrics.increment(Counter::DuplicatesDiscarded, 1);
            debug!(endpoint = self.conn.name(), message_id = %message.id, "duplicate discarded");
            self.bus.publish(
                Event::new(EventKind::DuplicateDiscarded)
                    .with_endpoint(self.conn.name())
                    .with_message_id(message.id.as_str()),
            );
            return Ok(Cycle::Duplicate);
        }

        let cycle = match self.codec.decode(&message) {
            Ok(mut record) => {
                self.map_headers(&mut record, &message);
                self.output.submit(record)?;
                Cycle::Emitted
            }
            Err(reason) => {
                self.discard(&message, reason);
                Cycle::Dropped(reason)
            }
        };

        if let Some(region) = &self.region {
            tracker.track(generation, &message);
            if region.is_trigger() {
                let count = tracker.count_for_trigger();
                if self.config.trigger_count.is_some_and(|n| count >= n) {
                    tracker.reset_trigger();
                    region.make_consistent();
                    self.bus.publish(
                        Event::new(EventKind::ConsistencyRequested)
                            .with_endpoint(self.conn.name())
                            .with_count(count),
                    );
                }
            }
        }
        Ok(cycle)
    }

    fn map_headers(&self, record: &mut Record, message: &Message) {
        let headers = &self.config.headers;
        let always = [
            (&headers.message_id, Value::String(message.id.clone())),
            (&headers.timestamp, Value::Long(message.timestamp)),
            (&headers.redelivered, Value::Boolean(message.redelivered)),
            (&headers.destination, Value::String(message.destination.clone())),
            (&headers.delivery_mode, Value::Int(message.delivery_mode.code())),
            (&headers.expiration, Value::Long(message.expiration)),
            (&headers.priority, Value::Int(i32::from(message.priority))),
        ];
        for (name, value) in always {
            if let Some(name) = name {
                record.push(name.as_str(), value);
            }
        }
        let optional = [
            (&headers.correlation_id, &message.correlation_id),
            (&headers.reply_to, &message.reply_to),
            (&headers.message_type, &message.message_type),
        ];
        for (name, value) in optional {
            if let (Some(name), Some(value)) = (name, value) {
                record.push(name.as_str(), Value::String(value.clone()));
            }
        }

        for m in &self.config.properties {
            let Some(value) = message.property(&m.property) else {
                debug!(
                    endpoint = self.conn.name(),
                    property = %m.property,
                    "property not in message"
                );
                continue;
            };
            match m.kind.coerce(value) {
                Some(value) => record.push(m.field.as_str(), value),
                None => warn!(
                    endpoint = self.conn.name(),
                    message_id = %message.id,
                    property = %m.property,
                    expected = m.kind.name(),
                    found = value.type_name(),
                    "property value not convertible, skipped"
                ),
            }
        }
    }

    fn discard(&self, message: &Message, reason: DiscardReason) {
        self.metrics.increment(Counter::MessagesDropped, 1);
        warn!(
            endpoint = self.conn.name(),
            message_id = %message.id,
            reason = reason.as_label(),
            "message discarded"
        );
        self.bus.publish(
            Event::new(EventKind::MessageDiscarded)
                .with_endpoint(self.conn.name())
                .with_message_id(message.id.as_str())
                .with_reason(reason.as_label()),
        );
        if let Some(errors) = &self.errors {
            errors.report(DeliveryFailure::for_message(message.id.as_str(), reason.to_string()));
        }
    }

    fn request_reset(&self, err: &ConnectionError) {
        let Some(region) = &self.region else {
            return;
        };
        region.request_reset();
        self.bus.publish(
            Event::new(EventKind::ResetRequested)
                .with_endpoint(self.conn.name())
                .with_reason(err.to_string()),
        );
    }

    async fn recover_session(&self, err: ConnectionError) -> Result<Cycle, BridgeError> {
        if err.is_fatal() {
            return Err(err.into());
        }
        warn!(endpoint = self.conn.name(), error = %err, "receive failed, reconnecting");
        self.conn.reconnect().await?;
        Ok(Cycle::Reconnected)
    }

    /// Called without the region permit. Tries one new session; the region reset does the rest.
    async fn recover_in_region(&self, err: ConnectionError) -> Result<Cycle, BridgeError> {
        if err.is_fatal() {
            return Err(err.into());
        }
        warn!(endpoint = self.conn.name(), error = %err, "receive failed, requesting reset");
        self.request_reset(&err);
        match self.conn.connect_with(RetryPolicy::NoRetry).await {
            Ok(_) => Ok(Cycle::Reconnected),
            Err(ConnectionError::Canceled) => Err(ConnectionError::Canceled.into()),
            Err(err) => {
                debug!(endpoint = self.conn.name(), error = %err, "waiting for region reset");
                self.reset_pending.send_replace(true);
                Ok(Cycle::ResetPending)
            }
        }
    }

    /// Waits while a region reset is owed; false if shutdown came first.
    async fn wait_reset(&self) -> bool {
        let mut rx = self.reset_pending.subscribe();
        loop {
            if !*rx.borrow_and_update() {
                return true;
            }
            select! {
                res = rx.changed() => if res.is_err() { return true },
                _ = self.token.cancelled() => return false,
            }
        }
    }

    async fn wait_initial(&self) -> Result<(), BridgeError> {
        let mut rx = self.initial.subscribe();
        let outcome = loop {
            let current = *rx.borrow_and_update();
            if current != Initial::Pending {
                break current;
            }
            select! {
                res = rx.changed() => if res.is_err() { break Initial::Failed },
                _ = self.token.cancelled() => return Err(ConnectionError::Canceled.into()),
            }
        };
        match outcome {
            Initial::Established => Ok(()),
            _ => Err(ConnectionError::NotConnected.into()),
        }
    }

    /// `recover` on the open session.
    ///
    /// A dead session is replaced, which redelivers the same messages.
    async fn redeliver(&self) -> Result<(), ConnectionError> {
        match self.conn.recover().await {
            Ok(()) => Ok(()),
            Err(err) if !err.is_fatal() => {
                warn!(endpoint = self.conn.name(), error = %err, "recover failed, reconnecting");
                self.conn.reconnect().await.map(|_| ())
            }
            Err(err) => Err(err),
        }
    }
}

#[async_trait]
impl StateHandler for ReaderEndpoint {
    async fn checkpoint(&self, checkpoint: &mut Checkpoint) -> Result<(), BridgeError> {
        let id = checkpoint.sequence_id();
        let mut tracker = self.tracker.lock().await;
        let written = tracker
            .snapshot()
            .to_bytes()
            .and_then(|bytes| checkpoint.write(bytes));
        if let Err(err) = written {
            self.bus.publish(
                Event::new(EventKind::CheckpointFailed)
                    .with_endpoint(self.conn.name())
                    .with_checkpoint(id)
                    .with_reason(err.to_string()),
            );
            return Err(err.into());
        }
        tracker.mark_checkpointed();

        self.metrics
            .set(Gauge::LastCheckpointId, i64::try_from(id).unwrap_or(i64::MAX));
        self.bus.publish(
            Event::new(EventKind::CheckpointCompleted)
                .with_endpoint(self.conn.name())
                .with_checkpoint(id),
        );
        Ok(())
    }

    async fn drain(&self) -> Result<(), BridgeError> {
        debug!(endpoint = self.conn.name(), "drain");
        Ok(())
    }

    async fn reset(&self, checkpoint: &Checkpoint) -> Result<(), BridgeError> {
        self.wait_initial().await?;
        let mut tracker = self.tracker.lock().await;
        self.redeliver().await?;

        let snapshot = match checkpoint.data() {
            Some(bytes) => ReaderSnapshot::from_bytes(bytes)?,
            None => ReaderSnapshot::default(),
        };
        let discarded = drain_duplicates(
            &self.conn,
            snapshot.window(),
            self.config.receive_timeout,
            &self.metrics,
            &self.bus,
        )
        .await?;
        tracker.clear();

        self.bus.publish(
            Event::new(EventKind::DrainCompleted)
                .with_endpoint(self.conn.name())
                .with_checkpoint(checkpoint.sequence_id())
                .with_count(discarded),
        );
        self.reset_pending.send_replace(false);
        self.bus.publish(
            Event::new(EventKind::ResetApplied)
                .with_endpoint(self.conn.name())
                .with_checkpoint(checkpoint.sequence_id()),
        );
        Ok(())
    }

    async fn reset_to_initial_state(&self) -> Result<(), BridgeError> {
        self.wait_initial().await?;
        let mut tracker = self.tracker.lock().await;
        self.redeliver().await?;
        tracker.clear();
        self.reset_pending.send_replace(false);
        self.bus
            .publish(Event::new(EventKind::ResetApplied).with_endpoint(self.conn.name()));
        Ok(())
    }

    async fn retire_checkpoint(&self, id: u64) -> Result<(), BridgeError> {
        debug!(endpoint = self.conn.name(), checkpoint_id = id, "checkpoint retired");
        Ok(())
    }
}
