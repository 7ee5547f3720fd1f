//! Stream messages: schema fields written positionally.

use crate::error::{ConfigError, EncodeError};
use crate::provider::{Body, Message};

use super::{
    DiscardReason, Encoded, MessageClass, MessageCodec, NativeField, Record, check_schema,
    project,
};

/// Codec producing [`Body::Stream`] messages.
#[derive(Debug)]
pub struct StreamCodec {
    schema: Vec<NativeField>,
}

impl StreamCodec {
    pub fn new(schema: Vec<NativeField>) -> Result<Self, ConfigError> {
        check_schema(MessageClass::Stream, &schema)?;
        Ok(Self { schema })
    }
}

impl MessageCodec for StreamCodec {
    fn class(&self) -> MessageClass {
        MessageClass::Stream
    }

    fn encode(&self, record: &Record) -> Result<Encoded, EncodeError> {
        let (fields, truncated) = project(&self.schema, record)?;
        Ok(Encoded {
            body: Body::Stream(fields.into_iter().map(|(_, v)| v).collect()),
            truncated,
        })
    }

    fn decode(&self, message: &Message) -> Result<Record, DiscardReason> {
        let Body::Stream(values) = &message.body else {
            return Err(DiscardReason::WrongType);
        };
        if values.len() < self.schema.len() {
            return Err(DiscardReason::UnexpectedEnd);
        }
        let mut record = Record::new();
        for (field, value) in self.schema.iter().zip(values) {
            if !field.kind.accepts(value) {
                return Err(DiscardReason::FormatError);
            }
            record.push(field.name.clone(), value.clone());
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::NativeType;
    use crate::provider::Value;

    fn codec() -> StreamCodec {
        StreamCodec::new(vec![
            NativeField::new("seq", NativeType::Int),
            NativeField::new("raw", NativeType::Bytes).with_length(2),
        ])
        .unwrap()
    }

    #[test]
    fn test_positional_encoding_with_byte_truncation() {
        let enc = codec()
            .encode(&Record::new().with("raw", vec![1_u8, 2, 3]).with("seq", 5_i32))
            .unwrap();
        assert!(enc.truncated);
        assert_eq!(
            enc.body,
            Body::Stream(vec![Value::Int(5), Value::Bytes(vec![1, 2])])
        );
    }

    #[test]
    fn test_short_stream_is_unexpected_end() {
        let msg = Message::new(Body::Stream(vec![Value::Int(1)]));
        assert_eq!(codec().decode(&msg), Err(DiscardReason::UnexpectedEnd));
    }

    #[test]
    fn test_wrong_positional_type_is_format_error() {
        let msg = Message::new(Body::Stream(vec![Value::Long(1), Value::Bytes(vec![])]));
        assert_eq!(codec().decode(&msg), Err(DiscardReason::FormatError));
    }
}
