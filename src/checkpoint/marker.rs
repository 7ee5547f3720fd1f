//! Control-queue checkpoint markers.
//!
//! A marker is a body-less message with two properties:
//!
//! | property                 | type   | value                         |
//! |--------------------------|--------|-------------------------------|
//! | `StreamsOperatorCkpName` | string | writer's operator id          |
//! | `checkpointId`           | long   | last committed checkpoint id  |
//!
//! Writers sharing a control queue only ever consume their own markers
//! (selector on the operator id).

use crate::error::CheckpointError;
use crate::provider::{Body, Message, Selector, Value};

pub const OPERATOR_PROPERTY: &str = "StreamsOperatorCkpName";
pub const CHECKPOINT_PROPERTY: &str = "checkpointId";

/// The durable record of a writer's last committed checkpoint.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckpointMarker {
    pub operator_id: String,
    pub checkpoint_id: u64,
}

impl CheckpointMarker {
    pub fn new(operator_id: impl Into<String>, checkpoint_id: u64) -> Self {
        Self {
            operator_id: operator_id.into(),
            checkpoint_id,
        }
    }

    /// Selector matching the markers of `operator_id`.
    pub fn selector(operator_id: &str) -> String {
        Selector::equals_clause(OPERATOR_PROPERTY, operator_id)
    }

    pub fn to_message(&self) -> Message {
        Message::new(Body::Empty)
            .with_property(OPERATOR_PROPERTY, self.operator_id.as_str())
            .with_property(
                CHECKPOINT_PROPERTY,
                Value::Long(i64::try_from(self.checkpoint_id).unwrap_or(i64::MAX)),
            )
    }

    pub fn from_message(message: &Message) -> Result<Self, CheckpointError> {
        let malformed = |reason: &str| CheckpointError::MalformedMarker {
            reason: reason.to_string(),
        };
        let operator_id = message
            .property(OPERATOR_PROPERTY)
            .and_then(Value::as_str)
            .ok_or_else(|| malformed("missing operator name"))?;
        let checkpoint_id = message
            .property(CHECKPOINT_PROPERTY)
            .and_then(Value::as_i64)
            .ok_or_else(|| malformed("missing checkpoint id"))?;
        let checkpoint_id =
            u64::try_from(checkpoint_id).map_err(|_| malformed("negative checkpoint id"))?;
        Ok(Self::new(operator_id, checkpoint_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_marker_wire_format() {
        let msg = CheckpointMarker::new("sink", 5).to_message();
        assert_eq!(msg.body, Body::Empty);
        assert_eq!(
            msg.property(OPERATOR_PROPERTY),
            Some(&Value::String("sink".into()))
        );
        assert_eq!(msg.property(CHECKPOINT_PROPERTY), Some(&Value::Long(5)));
        assert_eq!(
            CheckpointMarker::from_message(&msg).unwrap(),
            CheckpointMarker::new("sink", 5)
        );
    }

    #[test]
    fn test_selector_matches_only_own_markers() {
        let sel = Selector::parse(&CheckpointMarker::selector("sink")).unwrap();
        assert!(sel.matches(&CheckpointMarker::new("sink", 1).to_message()));
        assert!(!sel.matches(&CheckpointMarker::new("other", 1).to_message()));
    }

    #[test]
    fn test_rejects_malformed_markers() {
        let no_id = Message::new(Body::Empty).with_property(OPERATOR_PROPERTY, "sink");
        assert!(CheckpointMarker::from_message(&no_id).is_err());

        let negative = no_id.with_property(CHECKPOINT_PROPERTY, -1_i64);
        assert!(matches!(
            CheckpointMarker::from_message(&negative),
            Err(CheckpointError::MalformedMarker { .. })
        ));
    }
}
