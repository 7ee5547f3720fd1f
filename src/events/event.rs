//! # Events emitted by the connection supervisor and the endpoints.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Connection events**: session establishment, retries, exhaustion
//! - **Delivery events**: records dropped on write, messages discarded on read
//! - **Checkpoint events**: commit, rollback, reset and drain of the region protocol
//! - **Subscriber events**: overflow and panics inside subscriber workers
//!
//! The [`Event`] struct carries metadata such as the endpoint name, attempt
//! number, session generation and checkpoint id.
//!
//! ## Ordering guarantees
//! Every event published on a [`Bus`](crate::events::Bus) gets a sequence number
//! from that bus (`seq`), increasing monotonically per bus.
//!
//! ## Example
//! ```rust
//! use std::time::Duration;
//! use mqbridge::{Event, EventKind};
//!
//! let ev = Event::new(EventKind::RetryScheduled)
//!     .with_endpoint("orders-writer")
//!     .with_attempt(2)
//!     .with_delay(Duration::from_secs(60))
//!     .with_reason("connection refused");
//!
//! assert_eq!(ev.kind, EventKind::RetryScheduled);
//! assert_eq!(ev.endpoint.as_deref(), Some("orders-writer"));
//! assert_eq!(ev.delay_ms, Some(60_000));
//! ```

use std::sync::Arc;
use std::time::{Duration, SystemTime};

/// Classification of events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets:
    /// - `endpoint`: subscriber name
    /// - `reason`: panic info
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets:
    /// - `endpoint`: subscriber name
    /// - `reason`: "full" or "closed"
    SubscriberOverflow,

    // === Connection events ===
    /// A connection attempt is starting.
    ///
    /// Sets:
    /// - `endpoint`, `attempt` (1-based, per connect call)
    ConnectStarting,

    /// A session was established.
    ///
    /// Sets:
    /// - `endpoint`, `attempt`, `generation` (new session generation)
    Connected,

    /// A connection attempt failed.
    ///
    /// Sets:
    /// - `endpoint`, `attempt`, `reason`
    ConnectFailed,

    /// Another attempt will follow after a delay.
    ///
    /// Sets:
    /// - `endpoint`, `attempt` (failed attempt), `delay_ms`, `reason`
    RetryScheduled,

    /// The retry policy gave up.
    ///
    /// Sets:
    /// - `endpoint`, `attempt` (total attempts), `reason`
    RetriesExhausted,

    /// A session was closed (explicitly or before reconnecting).
    ///
    /// Sets:
    /// - `endpoint`, `generation`
    SessionClosed,

    // === Delivery events ===
    /// The writer dropped a record after all send attempts failed, or could not encode it.
    ///
    /// Sets:
    /// - `endpoint`, `reason`
    RecordDropped,

    /// The reader dropped a message it could not decode.
    ///
    /// Sets:
    /// - `endpoint`, `message_id`, `reason` (discard reason label)
    MessageDiscarded,

    /// The reader discarded a redelivered message it had already emitted.
    ///
    /// Sets:
    /// - `endpoint`, `message_id`
    DuplicateDiscarded,

    // === Checkpoint events ===
    /// A checkpoint completed (writer: marker sent and committed; reader: snapshot written).
    ///
    /// Sets:
    /// - `endpoint`, `checkpoint_id`
    CheckpointCompleted,

    /// The writer rolled back a replayed cycle instead of committing it.
    ///
    /// Sets:
    /// - `endpoint`, `checkpoint_id`
    CheckpointRolledBack,

    /// A checkpoint failed.
    ///
    /// Sets:
    /// - `endpoint`, `checkpoint_id`, `reason`
    CheckpointFailed,

    /// The endpoint was reset to a checkpoint (`checkpoint_id`) or to its initial state (none).
    ///
    /// Sets:
    /// - `endpoint`, `checkpoint_id` (optional)
    ResetApplied,

    /// The dedup drain after a reset finished.
    ///
    /// Sets:
    /// - `endpoint`, `count` (duplicates acknowledged and discarded)
    DrainCompleted,

    /// The trigger reader asked the region to establish a consistent state.
    ///
    /// Sets:
    /// - `endpoint`, `count` (messages since the last request)
    ConsistencyRequested,

    /// The endpoint asked the region for a reset after a session failure.
    ///
    /// Sets:
    /// - `endpoint`, `reason`
    ResetRequested,

    // === Shutdown events ===
    /// Shutdown was requested; loops and retries are being cancelled.
    ///
    /// Sets:
    /// - `endpoint`
    ShutdownRequested,
}

/// Event with optional metadata.
///
/// - `seq`: sequence number assigned by the bus on publish
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Sequence number (0 until published).
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,
    /// Endpoint (or subscriber) name.
    pub endpoint: Option<Arc<str>>,
    /// Attempt count (starting from 1).
    pub attempt: Option<u32>,
    /// Delay before the next attempt in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Human-readable reason.
    pub reason: Option<Arc<str>>,
    /// Session generation.
    pub generation: Option<u64>,
    /// Checkpoint sequence id.
    pub checkpoint_id: Option<u64>,
    /// Provider message id.
    pub message_id: Option<Arc<str>>,
    /// Event-specific count.
    pub count: Option<u64>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: 0,
            at: SystemTime::now(),
            kind,
            endpoint: None,
            attempt: None,
            delay_ms: None,
            reason: None,
            generation: None,
            checkpoint_id: None,
            message_id: None,
            count: None,
        }
    }

    #[inline]
    pub fn with_endpoint(mut self, endpoint: impl Into<Arc<str>>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_generation(mut self, generation: u64) -> Self {
        self.generation = Some(generation);
        self
    }

    #[inline]
    pub fn with_checkpoint(mut self, id: u64) -> Self {
        self.checkpoint_id = Some(id);
        self
    }

    #[inline]
    pub fn with_message_id(mut self, id: impl Into<Arc<str>>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    #[inline]
    pub fn with_count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_endpoint(subscriber)
            .with_reason(reason)
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_endpoint(subscriber)
            .with_reason(info)
    }

    /// True for events about subscribers themselves.
    #[inline]
    pub fn is_subscriber_event(&self) -> bool {
        matches!(
            self.kind,
            EventKind::SubscriberOverflow | EventKind::SubscriberPanicked
        )
    }
}
