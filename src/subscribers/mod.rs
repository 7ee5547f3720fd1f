//! # Event subscribers.
//!
//! This module provides the [`Subscribe`] trait, the [`SubscriberSet`] fan-out
//! and the built-in [`LogWriter`].
//!
//! ## Architecture
//! ```text
//! Event flow:
//!   ConnectionSupervisor / endpoints ── publish(Event) ──► Bus
//!                                                           │
//!                                             SubscriberSet::listen()
//!                                                           │
//!                                        ┌─────────┬────────┴──┬───────┐
//!                                        ▼         ▼           ▼       ▼
//!                                    LogWriter   Alerts     Custom    ...
//! ```
//!
//! ## Wiring
//! ```rust
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use std::sync::Arc;
//! use mqbridge::{Bus, LogWriter, Subscribe, SubscriberSet};
//!
//! let bus = Bus::default();
//! let set = Arc::new(SubscriberSet::new(vec![Arc::new(LogWriter) as Arc<dyn Subscribe>], bus.clone()));
//! let _listener = set.listen();
//! # }
//! ```

#[cfg(feature = "logging")]
mod log;
mod set;
mod subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
pub use set::SubscriberSet;
pub use subscribe::Subscribe;
