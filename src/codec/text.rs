//! Text messages: the whole record is one string field.

use crate::error::{ConfigError, EncodeError};
use crate::provider::{Body, Message, Value};

use super::{
    DiscardReason, Encoded, MessageClass, MessageCodec, NativeField, NativeType, Record,
    check_schema, project, truncate,
};

/// Codec producing [`Body::Text`] messages from a single-`String` schema.
///
/// Decoding accepts text and UTF-8 byte bodies; the field's length bound
/// applies in both directions.
#[derive(Debug)]
pub struct TextCodec {
    field: NativeField,
}

impl TextCodec {
    pub fn new(schema: Vec<NativeField>) -> Result<Self, ConfigError> {
        check_schema(MessageClass::Text, &schema)?;
        let mut schema = schema.into_iter();
        match (schema.next(), schema.next()) {
            (Some(field), None) if field.kind == NativeType::String => Ok(Self { field }),
            _ => Err(ConfigError::Schema {
                class: MessageClass::Text.as_label(),
                reason: "schema must consist of exactly one string field".into(),
            }),
        }
    }
}

impl MessageCodec for TextCodec {
    fn class(&self) -> MessageClass {
        MessageClass::Text
    }

    fn encode(&self, record: &Record) -> Result<Encoded, EncodeError> {
        let (mut fields, truncated) = project(std::slice::from_ref(&self.field), record)?;
        let body = match fields.pop() {
            Some((_, Value::String(s))) => Body::Text(s),
            _ => Body::Empty,
        };
        Ok(Encoded { body, truncated })
    }

    fn decode(&self, message: &Message) -> Result<Record, DiscardReason> {
        let text = match &message.body {
            Body::Text(s) => s.clone(),
            Body::Bytes(b) => {
                String::from_utf8(b.clone()).map_err(|_| DiscardReason::Unreadable)?
            }
            _ => return Err(DiscardReason::WrongType),
        };
        let (value, _) = truncate(Value::String(text), self.field.length);
        Ok(Record::new().with(self.field.name.clone(), value))
    }
}
