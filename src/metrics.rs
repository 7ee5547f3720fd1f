//! # Injected metrics sinks.
//!
//! Endpoints and the connection supervisor report through an
//! `Arc<dyn MetricsSink>` handed to them at construction; nothing is global.
//!
//! - [`AtomicMetrics`] keeps counters in memory (tests, embedded hosts).
//! - [`NoopMetrics`] discards everything (default).
//! - `FacadeMetrics` (feature `facade-metrics`) forwards to the `metrics` crate.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Monotonic counters.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Counter {
    ReconnectionAttempts,
    MessagesRead,
    MessagesDropped,
    FailedInserts,
    TruncatedInserts,
    DuplicatesDiscarded,
}

impl Counter {
    pub const ALL: [Counter; 6] = [
        Counter::ReconnectionAttempts,
        Counter::MessagesRead,
        Counter::MessagesDropped,
        Counter::FailedInserts,
        Counter::TruncatedInserts,
        Counter::DuplicatesDiscarded,
    ];

    /// Metric name.
    pub fn name(&self) -> &'static str {
        match self {
            Counter::ReconnectionAttempts => "reconnection_attempts",
            Counter::MessagesRead => "messages_read",
            Counter::MessagesDropped => "messages_dropped",
            Counter::FailedInserts => "failed_inserts",
            Counter::TruncatedInserts => "truncated_inserts",
            Counter::DuplicatesDiscarded => "duplicates_discarded",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Point-in-time values.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Gauge {
    SessionGeneration,
    LastCheckpointId,
}

impl Gauge {
    pub fn name(&self) -> &'static str {
        match self {
            Gauge::SessionGeneration => "session_generation",
            Gauge::LastCheckpointId => "last_checkpoint_id",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// Destination for endpoint metrics.
pub trait MetricsSink: Send + Sync + 'static {
    fn increment(&self, counter: Counter, by: u64);

    fn set(&self, gauge: Gauge, value: i64);
}

/// Discards every update.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn increment(&self, _counter: Counter, _by: u64) {}

    fn set(&self, _gauge: Gauge, _value: i64) {}
}

/// In-memory sink with readable values.
///
/// ## Example
/// ```rust
/// use mqbridge::{AtomicMetrics, Counter, MetricsSink};
///
/// let m = AtomicMetrics::default();
/// m.increment(Counter::MessagesRead, 2);
/// assert_eq!(m.counter(Counter::MessagesRead), 2);
/// ```
#[derive(Debug, Default)]
pub struct AtomicMetrics {
    counters: [AtomicU64; 6],
    gauges: [AtomicI64; 2],
}

impl AtomicMetrics {
    pub fn counter(&self, counter: Counter) -> u64 {
        self.counters[counter.index()].load(Ordering::Relaxed)
    }

    pub fn gauge(&self, gauge: Gauge) -> i64 {
        self.gauges[gauge.index()].load(Ordering::Relaxed)
    }
}

impl MetricsSink for AtomicMetrics {
    fn increment(&self, counter: Counter, by: u64) {
        self.counters[counter.index()].fetch_add(by, Ordering::Relaxed);
    }

    fn set(&self, gauge: Gauge, value: i64) {
        self.gauges[gauge.index()].store(value, Ordering::Relaxed);
    }
}

/// Forwards to the `metrics` facade, labelled with the endpoint name.
#[cfg(feature = "facade-metrics")]
#[derive(Clone, Debug)]
pub struct FacadeMetrics {
    endpoint: String,
}

#[cfg(feature = "facade-metrics")]
impl FacadeMetrics {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
        }
    }
}

#[cfg(feature = "facade-metrics")]
impl MetricsSink for FacadeMetrics {
    fn increment(&self, counter: Counter, by: u64) {
        ::metrics::counter!(counter.name(), "endpoint" => self.endpoint.clone()).increment(by);
    }

    fn set(&self, gauge: Gauge, value: i64) {
        ::metrics::gauge!(gauge.name(), "endpoint" => self.endpoint.clone()).set(value as f64);
    }
}
