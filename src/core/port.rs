//! # Host output ports.
//!
//! The reader submits decoded records to an [`OutputPort`]; both endpoints may
//! report per-record failures to an optional [`ErrorPort`]. Unbounded tokio
//! channels implement both.

use tokio::sync::mpsc;

use crate::codec::Record;
use crate::error::PortClosed;

/// A record the endpoint could not deliver or decode.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryFailure {
    /// The record, when there was one (writer side).
    pub record: Option<Record>,
    /// Provider message id (reader side).
    pub message_id: Option<String>,
    pub reason: String,
}

impl DeliveryFailure {
    pub fn for_record(record: Record, reason: impl Into<String>) -> Self {
        Self {
            record: Some(record),
            message_id: None,
            reason: reason.into(),
        }
    }

    pub fn for_message(message_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            record: None,
            message_id: Some(message_id.into()),
            reason: reason.into(),
        }
    }
}

/// Accepts records emitted by the reader.
pub trait OutputPort: Send + Sync + 'static {
    fn submit(&self, record: Record) -> Result<(), PortClosed>;
}

/// Accepts per-record failures.
pub trait ErrorPort: Send + Sync + 'static {
    fn report(&self, failure: DeliveryFailure);
}

impl OutputPort for mpsc::UnboundedSender<Record> {
    fn submit(&self, record: Record) -> Result<(), PortClosed> {
        self.send(record).map_err(|_| PortClosed)
    }
}

impl ErrorPort for mpsc::UnboundedSender<DeliveryFailure> {
    fn report(&self, failure: DeliveryFailure) {
        let _ = self.send(failure);
    }
}
