//! Reader-side delivery tracking and the dedup drain.
//!
//! Between two checkpoints the reader remembers the newest timestamp it
//! emitted and the ids emitted at exactly that timestamp ([`LastDelivered`]).
//! After the provider redelivers (a new session, or `recover` after a reset),
//! a message is a duplicate when
//!
//! ```text
//! ts < last.timestamp  ||  (ts == last.timestamp && id ∈ last.ids)
//! ```
//!
//! The window covers one timestamp bucket: it is replaced whenever a newer
//! timestamp is seen, so it stays small whatever the throughput.
//!
//! ## Dedup drain
//! ```text
//! window empty            → nothing to do
//! loop receive(timeout)
//!   ├─ timeout            → stop
//!   ├─ duplicate          → acknowledge, discard, continue
//!   └─ first non-duplicate→ recover (it is delivered again), stop
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::ConnectionSupervisor;
use crate::error::{CheckpointError, ConnectionError};
use crate::events::{Bus, Event, EventKind};
use crate::metrics::{Counter, MetricsSink};
use crate::provider::Message;

/// Newest emitted timestamp and the ids emitted at it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastDelivered {
    pub timestamp: i64,
    /// Insertion-ordered, without repeats.
    pub ids: Vec<String>,
}

impl LastDelivered {
    /// True if a message with this timestamp/id was already emitted.
    pub fn covers(&self, timestamp: i64, id: &str) -> bool {
        timestamp < self.timestamp
            || (timestamp == self.timestamp && self.ids.iter().any(|i| i == id))
    }

    fn observe(&mut self, timestamp: i64, id: &str) {
        if timestamp != self.timestamp {
            self.timestamp = timestamp;
            self.ids.clear();
        }
        if !self.ids.iter().any(|i| i == id) {
            self.ids.push(id.to_owned());
        }
    }
}

/// Snapshot stored with each reader checkpoint (one JSON document).
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReaderSnapshot {
    pub has_last_message: bool,
    #[serde(default)]
    pub last: Option<LastDelivered>,
}

impl ReaderSnapshot {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CheckpointError> {
        serde_json::to_vec(self).map_err(|e| CheckpointError::Snapshot {
            reason: e.to_string(),
        })
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CheckpointError> {
        serde_json::from_slice(bytes).map_err(|e| CheckpointError::Snapshot {
            reason: e.to_string(),
        })
    }

    /// The dedup window to restore, if the snapshot holds one.
    pub fn window(&self) -> Option<&LastDelivered> {
        if self.has_last_message {
            self.last.as_ref()
        } else {
            None
        }
    }
}

/// Reader protocol state between checkpoints.
#[derive(Debug, Default)]
pub struct DeliveryTracker {
    last: Option<LastDelivered>,
    /// Session generation when tracking started.
    generation: u64,
    since_consistent: u64,
    ack_due: bool,
}

impl DeliveryTracker {
    /// True if `message` repeats one already emitted on an earlier session.
    pub fn is_redelivery(&self, current_generation: u64, message: &Message) -> bool {
        match &self.last {
            Some(last) => {
                current_generation > self.generation && last.covers(message.timestamp, &message.id)
            }
            None => false,
        }
    }

    /// Remembers `message` as handled on session `generation`.
    pub fn track(&mut self, generation: u64, message: &Message) {
        if self.last.is_none() {
            self.generation = generation;
        }
        self.last
            .get_or_insert_with(LastDelivered::default)
            .observe(message.timestamp, &message.id);
    }

    pub fn snapshot(&self) -> ReaderSnapshot {
        ReaderSnapshot {
            has_last_message: self.last.is_some(),
            last: self.last.clone(),
        }
    }

    /// Counts one emitted message; returns the count since the last consistency request.
    pub fn count_for_trigger(&mut self) -> u64 {
        self.since_consistent += 1;
        self.since_consistent
    }

    pub fn reset_trigger(&mut self) {
        self.since_consistent = 0;
    }

    pub fn mark_checkpointed(&mut self) {
        self.ack_due = true;
    }

    pub fn ack_due(&self) -> bool {
        self.ack_due
    }

    /// Forgets every tracked message (after acknowledgment or reset).
    pub fn clear(&mut self) {
        self.last = None;
        self.generation = 0;
        self.since_consistent = 0;
        self.ack_due = false;
    }
}

/// Acknowledges and discards redelivered messages covered by `window`.
///
/// Returns the number of duplicates discarded.
pub async fn drain_duplicates(
    conn: &ConnectionSupervisor,
    window: Option<&LastDelivered>,
    timeout: Duration,
    metrics: &Arc<dyn MetricsSink>,
    bus: &Bus,
) -> Result<u64, ConnectionError> {
    let Some(window) = window else {
        return Ok(0);
    };

    let mut discarded = 0;
    while let Some(msg) = conn.receive(timeout).await? {
        if !window.covers(msg.timestamp, &msg.id) {
            debug!(endpoint = conn.name(), message_id = %msg.id, "drain reached new message");
            conn.recover().await?;
            break;
        }
        conn.acknowledge().await?;
        discarded += 1;
        metrics.increment(Counter::DuplicatesDiscarded, 1);
        bus.publish(
            Event::new(EventKind::DuplicateDiscarded)
                .with_endpoint(conn.name())
                .with_message_id(msg.id.as_str()),
        );
    }
    Ok(discarded)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::Body;

    fn msg(id: &str, ts: i64) -> Message {
        Message::new(Body::Empty).with_id(id).with_timestamp(ts)
    }

    #[test]
    fn test_window_keeps_one_timestamp_bucket() {
        let mut t = DeliveryTracker::default();
        for (id, ts) in [("a", 100), ("b", 100), ("c", 100)] {
            t.track(1, &msg(id, ts));
        }
        let snap = t.snapshot();
        assert_eq!(snap.window().unwrap().ids, ["a", "b", "c"]);

        t.track(1, &msg("d", 101));
        let snap = t.snapshot();
        assert_eq!(
            snap.window(),
            Some(&LastDelivered {
                timestamp: 101,
                ids: vec!["d".into()]
            })
        );
    }

    #[test]
    fn test_redelivery_needs_a_newer_session() {
        let mut t = DeliveryTracker::default();
        t.track(1, &msg("a", 100));
        assert!(!t.is_redelivery(1, &msg("a", 100)));
        assert!(t.is_redelivery(2, &msg("a", 100)));
        assert!(t.is_redelivery(2, &msg("z", 99)));
        assert!(!t.is_redelivery(2, &msg("b", 100)));
        assert!(!t.is_redelivery(2, &msg("a", 101)));
    }

    #[test]
    fn test_clear_forgets_everything() {
        let mut t = DeliveryTracker::default();
        t.track(1, &msg("a", 100));
        t.mark_checkpointed();
        t.count_for_trigger();
        t.clear();
        assert!(!t.ack_due());
        assert_eq!(t.snapshot(), ReaderSnapshot::default());
        assert_eq!(t.count_for_trigger(), 1);
    }

    #[test]
    fn test_snapshot_json_round_trip_and_empty_window() {
        let mut t = DeliveryTracker::default();
        t.track(3, &msg("x", 7));
        let bytes = t.snapshot().to_bytes().unwrap();
        let back = ReaderSnapshot::from_bytes(&bytes).unwrap();
        assert_eq!(back, t.snapshot());

        let empty = ReaderSnapshot::from_bytes(br#"{"has_last_message":false}"#).unwrap();
        assert!(empty.window().is_none());
        assert!(ReaderSnapshot::from_bytes(b"not json").is_err());
    }
}
