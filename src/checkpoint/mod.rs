//! # Consistent-checkpoint protocol.
//!
//! Exactly-once effect across broker disconnects and restarts, using ordinary
//! queue messages as the durability substrate:
//!
//! - **writer**: a transacted session plus a [`CheckpointMarker`] committed in the
//!   same transaction as the records of the cycle; [`WriterCheckpoint`] decides
//!   between commit and rollback on each checkpoint;
//! - **reader**: a client-ack session acknowledged only after a checkpoint,
//!   a [`DeliveryTracker`] dedup window persisted as a [`ReaderSnapshot`], and
//!   [`drain_duplicates`] after a reset.

mod marker;
mod reader;
mod writer;

pub use marker::{CHECKPOINT_PROPERTY, CheckpointMarker, OPERATOR_PROPERTY};
pub use reader::{DeliveryTracker, LastDelivered, ReaderSnapshot, drain_duplicates};
pub use writer::{MarkerDecision, WriterCheckpoint};
