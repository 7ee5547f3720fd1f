//! Empty messages: header-only, no body.

use crate::error::{ConfigError, EncodeError};
use crate::provider::{Body, Message};

use super::{DiscardReason, Encoded, MessageClass, MessageCodec, NativeField, Record};

/// Codec producing [`Body::Empty`] messages.
///
/// The schema must be empty. Every inbound message decodes to an empty
/// record, whatever its body; header and property mappings fill it in.
#[derive(Debug, Default)]
pub struct EmptyCodec;

impl EmptyCodec {
    pub fn new(schema: Vec<NativeField>) -> Result<Self, ConfigError> {
        if !schema.is_empty() {
            return Err(ConfigError::Schema {
                class: MessageClass::Empty.as_label(),
                reason: "schema must have no fields".into(),
            });
        }
        Ok(Self)
    }
}

impl MessageCodec for EmptyCodec {
    fn class(&self) -> MessageClass {
        MessageClass::Empty
    }

    fn encode(&self, _record: &Record) -> Result<Encoded, EncodeError> {
        Ok(Encoded {
            body: Body::Empty,
            truncated: false,
        })
    }

    fn decode(&self, _message: &Message) -> Result<Record, DiscardReason> {
        Ok(Record::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NativeType;

    #[test]
    fn test_rejects_fields_and_ignores_bodies() {
        assert!(EmptyCodec::new(vec![NativeField::new("a", NativeType::Int)]).is_err());

        let c = EmptyCodec::new(Vec::new()).unwrap();
        let enc = c.encode(&Record::new().with("ignored", 1_i32)).unwrap();
        assert_eq!(enc.body, Body::Empty);
        assert!(c.decode(&Message::new(Body::Text("x".into()))).unwrap().is_empty());
    }
}
