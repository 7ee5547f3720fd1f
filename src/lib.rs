//! # mqbridge
//!
//! **mqbridge** provides a pair of message-queue connector endpoints: an inbound
//! [`ReaderEndpoint`] and an outbound [`WriterEndpoint`].
//!
//! Both keep working across broker disconnects through a supervised session
//! with a configurable [`RetryPolicy`]. Inside a host's consistent region they
//! give the data flow exactly-once effect, using ordinary queue messages as
//! the durability substrate.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!   host records                                         host records
//!        │                                                    ▲
//!        ▼                                                    │ OutputPort
//! ┌────────────────┐                                  ┌────────────────┐
//! │ WriterEndpoint │                                  │ ReaderEndpoint │
//! │ - encode       │                                  │ - decode       │
//! │ - resend       │◄── StateHandler callbacks ──────►│ - dedup window │
//! │ - marker proto │   (checkpoint / reset / drain)   │ - trigger      │
//! └───────┬────────┘                                  └───────┬────────┘
//!         ▼                                                   ▼
//! ┌────────────────────────────────────────────────────────────────────┐
//! │  ConnectionSupervisor (one per endpoint)                           │
//! │  - one session behind one async mutex                              │
//! │  - RetryPolicy connect loop, session generations                   │
//! └───────┬───────────────────────────────────────────────────┬────────┘
//!         ▼                                                   ▼
//!   Provider / ProviderSession                        Bus ──► SubscriberSet
//!   (data queue + control queue)                              ├─► LogWriter
//!                                                             └─► custom
//! ```
//!
//! ### Consistent region
//! ```text
//! writer: send* ─► checkpoint(seq) ─► receive own marker (control queue)
//!                                      ├─ missing, earlier commit ─► MissingMarker
//!                                      ├─ replayed cycle           ─► rollback
//!                                      └─ otherwise                ─► marker(seq) + commit
//!
//! reader: receive* ─► checkpoint(seq) ─► snapshot window, ack on next cycle
//!         reset(snapshot) ─► recover ─► drain duplicates ─► resume
//! ```
//!
//! ## Features
//! | Area              | Description                                                    | Key types / traits                          |
//! |-------------------|----------------------------------------------------------------|---------------------------------------------|
//! | **Endpoints**     | Outbound and inbound connectors.                               | [`WriterEndpoint`], [`ReaderEndpoint`]      |
//! | **Connection**    | Supervised session with retry policy.                          | [`ConnectionSupervisor`], [`RetryPolicy`]   |
//! | **Checkpointing** | Marker protocol (writer), dedup window and drain (reader).     | [`StateHandler`], [`CheckpointMarker`]      |
//! | **Region**        | Host consistent-region seam.                                   | [`RegionContext`], [`RegionGate`]           |
//! | **Codecs**        | Record ↔ message conversion for map/stream/text/bytes/empty.   | [`MessageCodec`], [`MessageClass`]          |
//! | **Providers**     | Broker client boundary and an in-memory broker.                | [`Provider`], [`MemoryBroker`]              |
//! | **Observability** | Lifecycle events and injected metrics.                         | [`Subscribe`], [`MetricsSink`]              |
//! | **Configuration** | Validated reader/writer configuration.                         | [`ReaderConfig`], [`WriterConfig`]          |
//!
//! ## Optional features
//! - `logging` (default): exports the built-in [`LogWriter`] subscriber.
//! - `facade-metrics`: exports `FacadeMetrics`, a [`MetricsSink`] over the `metrics` crate.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use mqbridge::{
//!     MemoryBroker, MessageClass, NativeField, NativeType, ReaderConfig, ReaderEndpoint,
//!     Record, WriterConfig, WriterEndpoint,
//! };
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let broker = Arc::new(MemoryBroker::new());
//!     let schema = vec![NativeField::new("sku", NativeType::String)];
//!
//!     let writer = WriterEndpoint::builder(
//!         WriterConfig::new("w1", "orders", MessageClass::Map, schema.clone()),
//!         broker.clone(),
//!     )
//!     .build()?;
//!     writer.initialize().await?;
//!     writer.process(Record::new().with("sku", "A-1")).await?;
//!
//!     let (tx, mut rx) = mpsc::unbounded_channel::<Record>();
//!     let reader = ReaderEndpoint::builder(
//!         ReaderConfig::new("r1", "orders", MessageClass::Map, schema),
//!         broker,
//!         Arc::new(tx),
//!     )
//!     .build()?;
//!     reader.initialize().await?;
//!     reader.poll_once().await?;
//!
//!     let record = rx.recv().await.ok_or("no record")?;
//!     assert_eq!(record.get("sku").and_then(|v| v.as_str()), Some("A-1"));
//!     Ok(())
//! }
//! ```
mod checkpoint;
mod codec;
mod config;
mod core;
mod endpoints;
mod error;
mod events;
mod metrics;
mod policies;
mod provider;
mod subscribers;

// ---- Public re-exports ----

pub use checkpoint::{
    CHECKPOINT_PROPERTY, CheckpointMarker, DeliveryTracker, LastDelivered, MarkerDecision,
    OPERATOR_PROPERTY, ReaderSnapshot, WriterCheckpoint, drain_duplicates,
};
pub use codec::{
    DiscardReason, Encoded, MessageClass, MessageCodec, NativeField, NativeType, Record,
};
pub use config::{HeaderMapping, PropertyMapping, ReaderConfig, WriterConfig};
pub use self::core::{
    Checkpoint, ConnectionSupervisor, DeliveryFailure, ErrorPort, OutputPort, RegionContext,
    RegionGate, RegionPermit, StateHandler,
};
pub use endpoints::{
    CONTROL_RECEIVE_TIMEOUT, Cycle, ReaderBuilder, ReaderEndpoint, WriterBuilder, WriterEndpoint,
};
pub use error::{
    BridgeError, CheckpointError, ConfigError, ConnectionError, EncodeError, PortClosed,
    ProviderError,
};
pub use events::{Bus, Event, EventKind};
pub use self::metrics::{AtomicMetrics, Counter, Gauge, MetricsSink, NoopMetrics};
pub use policies::{ResendPolicy, RetryPolicy};
pub use provider::{
    AckMode, Body, ControlQueue, DEFAULT_PRIORITY, DeliveryMode, MemoryBroker, Message, Provider,
    ProviderSession, Selector, SessionOptions, Value,
};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: `MetricsSink` over the `metrics` facade.
// Enable with: `--features facade-metrics`
#[cfg(feature = "facade-metrics")]
pub use self::metrics::FacadeMetrics;

// Optional: built-in logger subscriber.
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
