//! Map messages: one named entry per schema field.

use std::collections::BTreeMap;

use crate::error::{ConfigError, EncodeError};
use crate::provider::{Body, Message};

use super::{
    DiscardReason, Encoded, MessageClass, MessageCodec, NativeField, Record, check_schema,
    project,
};

/// Codec producing [`Body::Map`] messages.
#[derive(Debug)]
pub struct MapCodec {
    schema: Vec<NativeField>,
}

impl MapCodec {
    pub fn new(schema: Vec<NativeField>) -> Result<Self, ConfigError> {
        check_schema(MessageClass::Map, &schema)?;
        Ok(Self { schema })
    }
}

impl MessageCodec for MapCodec {
    fn class(&self) -> MessageClass {
        MessageClass::Map
    }

    fn encode(&self, record: &Record) -> Result<Encoded, EncodeError> {
        let (fields, truncated) = project(&self.schema, record)?;
        let map: BTreeMap<_, _> = fields.into_iter().collect();
        Ok(Encoded {
            body: Body::Map(map),
            truncated,
        })
    }

    fn decode(&self, message: &Message) -> Result<Record, DiscardReason> {
        let Body::Map(map) = &message.body else {
            return Err(DiscardReason::WrongType);
        };
        let mut record = Record::new();
        for field in &self.schema {
            match map.get(&field.name) {
                Some(value) if field.kind.accepts(value) => {
                    record.push(field.name.clone(), value.clone());
                }
                _ => return Err(DiscardReason::FormatError),
            }
        }
        Ok(record)
    }
}
