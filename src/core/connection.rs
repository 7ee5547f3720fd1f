//! # ConnectionSupervisor: one supervised broker session.
//!
//! Owns the provider session of one endpoint, establishes it under a
//! [`RetryPolicy`], and exposes session primitives that are safe to call from
//! the endpoint's loop and from host callbacks concurrently.
//!
//! ## Connect loop
//! ```text
//! connect(policy)
//!   ├─► close current session (if any)      → SessionClosed
//!   loop {
//!     ├─► attempt += 1                       → ConnectStarting
//!     ├─► provider.connect(options)  (cancellable)
//!     │      ├─ Ok  ─► generation += 1       → Connected, gauge session_generation
//!     │      └─ Err ─►                       → ConnectFailed
//!     ├─► policy.next_delay(attempt - 1)
//!     │      ├─ None  ─► RetriesExhausted, Err(Exhausted)
//!     │      └─ Some  ─► reconnection_attempts += 1, RetryScheduled
//!     └─► sleep(delay)               (cancellable → Err(Canceled))
//!   }
//! ```
//!
//! ## Rules
//! - All session access is serialized by one async mutex; a reconnect in
//!   progress blocks other operations until it resolves.
//! - Generations increase by one per established session and are never reused.
//! - Session operations never swallow provider errors and never reconnect on
//!   their own; the endpoint decides.
//! - Operations without a session fail with [`ConnectionError::NotConnected`].

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::{select, time, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::ConnectionError;
use crate::events::{Bus, Event, EventKind};
use crate::metrics::{Counter, Gauge, MetricsSink, NoopMetrics};
use crate::policies::RetryPolicy;
use crate::provider::{Message, Provider, ProviderSession, SessionOptions};

struct Slot {
    session: Option<Box<dyn ProviderSession>>,
    generation: u64,
    created_at: Option<Instant>,
}

impl Slot {
    fn active(&mut self) -> Result<&mut dyn ProviderSession, ConnectionError> {
        self.session
            .as_deref_mut()
            .ok_or(ConnectionError::NotConnected)
    }
}

/// Supervises the session of one endpoint.
///
/// ## Example
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use std::sync::Arc;
/// use mqbridge::{AckMode, ConnectionSupervisor, MemoryBroker, RetryPolicy, SessionOptions};
///
/// let broker = MemoryBroker::new();
/// let conn = ConnectionSupervisor::new(
///     "demo",
///     Arc::new(broker.clone()),
///     SessionOptions::new("q", AckMode::Auto),
///     RetryPolicy::NoRetry,
/// );
/// assert_eq!(conn.ensure_connected().await.unwrap(), 1);
/// assert_eq!(conn.reconnect().await.unwrap(), 2);
/// assert_eq!(broker.open_sessions(), 1);
/// # }
/// ```
pub struct ConnectionSupervisor {
    name: Arc<str>,
    provider: Arc<dyn Provider>,
    options: SessionOptions,
    policy: RetryPolicy,
    metrics: Arc<dyn MetricsSink>,
    bus: Bus,
    token: CancellationToken,
    generation: AtomicU64,
    slot: Mutex<Slot>,
}

impl ConnectionSupervisor {
    /// Creates a disconnected supervisor with no-op metrics, a private bus and its own token.
    pub fn new(
        name: impl Into<Arc<str>>,
        provider: Arc<dyn Provider>,
        options: SessionOptions,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            name: name.into(),
            provider,
            options,
            policy,
            metrics: Arc::new(NoopMetrics),
            bus: Bus::default(),
            token: CancellationToken::new(),
            generation: AtomicU64::new(0),
            slot: Mutex::new(Slot {
                session: None,
                generation: 0,
                created_at: None,
            }),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    /// Cancelling this token aborts connection attempts and retry sleeps.
    pub fn with_token(mut self, token: CancellationToken) -> Self {
        self.token = token;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    /// Generation of the most recently established session (`0` = never connected).
    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub async fn is_connected(&self) -> bool {
        self.slot.lock().await.session.is_some()
    }

    /// Generation and age of the open session, if any.
    pub async fn session_age(&self) -> Option<(u64, Duration)> {
        let slot = self.slot.lock().await;
        match (&slot.session, slot.created_at) {
            (Some(_), Some(at)) => Some((slot.generation, at.elapsed())),
            _ => None,
        }
    }

    /// Replaces the current session with a new one under the configured policy.
    pub async fn connect(&self) -> Result<u64, ConnectionError> {
        self.connect_with(self.policy).await
    }

    /// Replaces the current session with a new one under `policy`.
    pub async fn connect_with(&self, policy: RetryPolicy) -> Result<u64, ConnectionError> {
        let mut slot = self.slot.lock().await;
        self.establish(&mut slot, policy).await
    }

    /// Connects under the configured policy unless a session is already open.
    pub async fn ensure_connected(&self) -> Result<u64, ConnectionError> {
        let mut slot = self.slot.lock().await;
        if slot.session.is_some() {
            return Ok(slot.generation);
        }
        self.establish(&mut slot, self.policy).await
    }

    /// Closes the current session and connects again under the configured policy.
    pub async fn reconnect(&self) -> Result<u64, ConnectionError> {
        self.connect().await
    }

    /// Closes the current session, if any.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        self.release(&mut slot).await;
    }

    pub async fn send(&self, message: Message) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.send(message).await?)
    }

    pub async fn receive(&self, timeout: Duration) -> Result<Option<Message>, ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.receive(timeout).await?)
    }

    pub async fn send_control(&self, message: Message) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.send_control(message).await?)
    }

    pub async fn receive_control(
        &self,
        timeout: Duration,
    ) -> Result<Option<Message>, ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.receive_control(timeout).await?)
    }

    pub async fn acknowledge(&self) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.acknowledge().await?)
    }

    pub async fn commit(&self) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.commit().await?)
    }

    pub async fn rollback(&self) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.rollback().await?)
    }

    /// Forces redelivery of every unacknowledged message.
    pub async fn recover(&self) -> Result<(), ConnectionError> {
        let mut slot = self.slot.lock().await;
        Ok(slot.active()?.recover().await?)
    }

    async fn release(&self, slot: &mut Slot) {
        let Some(mut session) = slot.session.take() else {
            return;
        };
        if let Err(err) = session.close().await {
            debug!(endpoint = %self.name, error = %err, "session close failed");
        }
        slot.created_at = None;
        self.bus.publish(
            Event::new(EventKind::SessionClosed)
                .with_endpoint(Arc::clone(&self.name))
                .with_generation(slot.generation),
        );
    }

    async fn establish(
        &self,
        slot: &mut Slot,
        policy: RetryPolicy,
    ) -> Result<u64, ConnectionError> {
        self.release(slot).await;

        let mut attempt: u32 = 0;
        loop {
            if self.token.is_cancelled() {
                return Err(ConnectionError::Canceled);
            }
            attempt = attempt.saturating_add(1);
            self.bus.publish(
                Event::new(EventKind::ConnectStarting)
                    .with_endpoint(Arc::clone(&self.name))
                    .with_attempt(attempt),
            );

            let res = select! {
                res = self.provider.connect(&self.options) => res,
                _ = self.token.cancelled() => return Err(ConnectionError::Canceled),
            };
            let err = match res {
                Ok(session) => {
                    let generation = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                    slot.session = Some(session);
                    slot.generation = generation;
                    slot.created_at = Some(Instant::now());

                    self.metrics.set(
                        Gauge::SessionGeneration,
                        i64::try_from(generation).unwrap_or(i64::MAX),
                    );
                    self.bus.publish(
                        Event::new(EventKind::Connected)
                            .with_endpoint(Arc::clone(&self.name))
                            .with_attempt(attempt)
                            .with_generation(generation),
                    );
                    return Ok(generation);
                }
                Err(err) => err,
            };

            self.bus.publish(
                Event::new(EventKind::ConnectFailed)
                    .with_endpoint(Arc::clone(&self.name))
                    .with_attempt(attempt)
                    .with_reason(err.to_string()),
            );

            let Some(delay) = policy.next_delay(attempt - 1) else {
                self.bus.publish(
                    Event::new(EventKind::RetriesExhausted)
                        .with_endpoint(Arc::clone(&self.name))
                        .with_attempt(attempt)
                        .with_reason(err.to_string()),
                );
                return Err(ConnectionError::Exhausted {
                    attempts: attempt,
                    last: err,
                });
            };

            self.metrics.increment(Counter::ReconnectionAttempts, 1);
            self.bus.publish(
                Event::new(EventKind::RetryScheduled)
                    .with_endpoint(Arc::clone(&self.name))
                    .with_attempt(attempt)
                    .with_delay(delay)
                    .with_reason(err.to_string()),
            );

            let sleep = time::sleep(delay);
            tokio::pin!(sleep);
            select! {
                _ = &mut sleep => {}
                _ = self.token.cancelled() => return Err(ConnectionError::Canceled),
            }
        }
    }
}
