//! Bytes messages: schema fields packed in order into one binary payload.
//!
//! ```text
//! byte/boolean  1 byte        short  2 bytes     int/float   4 bytes
//! long/double   8 bytes       string/bytes  i32 length + payload (UTF-8 for strings)
//! ```
//! Numbers are big-endian. A bounded field is truncated before its length is written.

use crate::error::{ConfigError, EncodeError};
use crate::provider::{Body, Message, Value};

use super::{
    DiscardReason, Encoded, MessageClass, MessageCodec, NativeField, NativeType, Record,
    check_schema, project, truncate,
};

/// Codec producing [`Body::Bytes`] messages.
#[derive(Debug)]
pub struct BytesCodec {
    schema: Vec<NativeField>,
}

impl BytesCodec {
    pub fn new(schema: Vec<NativeField>) -> Result<Self, ConfigError> {
        check_schema(MessageClass::Bytes, &schema)?;
        Ok(Self { schema })
    }
}

fn put_len(out: &mut Vec<u8>, len: usize) -> Result<(), EncodeError> {
    let len = i32::try_from(len).map_err(|_| EncodeError::TooLarge { len })?;
    out.extend_from_slice(&len.to_be_bytes());
    Ok(())
}

fn put(out: &mut Vec<u8>, value: &Value) -> Result<(), EncodeError> {
    match value {
        Value::Byte(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Short(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Int(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Long(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Float(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Double(v) => out.extend_from_slice(&v.to_be_bytes()),
        Value::Boolean(v) => out.push(u8::from(*v)),
        Value::Bytes(v) => {
            put_len(out, v.len())?;
            out.extend_from_slice(v);
        }
        Value::String(v) => {
            put_len(out, v.len())?;
            out.extend_from_slice(v.as_bytes());
        }
    }
    Ok(())
}

/// Reads fields off the front of a payload.
struct Cursor<'a> {
    rest: &'a [u8],
}

impl<'a> Cursor<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], DiscardReason> {
        if self.rest.len() < n {
            return Err(DiscardReason::UnexpectedEnd);
        }
        let (head, tail) = self.rest.split_at(n);
        self.rest = tail;
        Ok(head)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], DiscardReason> {
        let mut buf = [0; N];
        buf.copy_from_slice(self.take(N)?);
        Ok(buf)
    }

    fn sized(&mut self) -> Result<&'a [u8], DiscardReason> {
        let len = i32::from_be_bytes(self.array()?);
        let len = usize::try_from(len).map_err(|_| DiscardReason::FormatError)?;
        self.take(len)
    }

    fn read(&mut self, kind: NativeType) -> Result<Value, DiscardReason> {
        Ok(match kind {
            NativeType::Byte => Value::Byte(i8::from_be_bytes(self.array()?)),
            NativeType::Short => Value::Short(i16::from_be_bytes(self.array()?)),
            NativeType::Int => Value::Int(i32::from_be_bytes(self.array()?)),
            NativeType::Long => Value::Long(i64::from_be_bytes(self.array()?)),
            NativeType::Float => Value::Float(f32::from_be_bytes(self.array()?)),
            NativeType::Double => Value::Double(f64::from_be_bytes(self.array()?)),
            NativeType::Boolean => Value::Boolean(self.take(1)?[0] != 0),
            NativeType::Bytes => Value::Bytes(self.sized()?.to_vec()),
            NativeType::String => {
                let raw = self.sized()?.to_vec();
                Value::String(String::from_utf8(raw).map_err(|_| DiscardReason::Unreadable)?)
            }
        })
    }
}

impl MessageCodec for BytesCodec {
    fn class(&self) -> MessageClass {
        MessageClass::Bytes
    }

    fn encode(&self, record: &Record) -> Result<Encoded, EncodeError> {
        let (fields, truncated) = project(&self.schema, record)?;
        let mut out = Vec::new();
        for (_, value) in &fields {
            put(&mut out, value)?;
        }
        Ok(Encoded {
            body: Body::Bytes(out),
            truncated,
        })
    }

    fn decode(&self, message: &Message) -> Result<Record, DiscardReason> {
        let Body::Bytes(payload) = &message.body else {
            return Err(DiscardReason::WrongType);
        };
        let mut cursor = Cursor { rest: payload };
        let mut record = Record::new();
        for field in &self.schema {
            let (value, _) = truncate(cursor.read(field.kind)?, field.length);
            record.push(field.name.clone(), value);
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn codec() -> BytesCodec {
        BytesCodec::new(vec![
            NativeField::new("seq", NativeType::Short),
            NativeField::new("ok", NativeType::Boolean),
            NativeField::new("note", NativeType::String).with_length(3),
        ])
        .unwrap()
    }

    #[test]
    fn test_packs_fields_big_endian_with_length_prefix() {
        let enc = codec()
            .encode(
                &Record::new()
                    .with("note", "abcdef")
                    .with("ok", true)
                    .with("seq", Value::Short(258)),
            )
            .unwrap();
        assert!(enc.truncated);
        assert_eq!(enc.body, Body::Bytes(vec![1, 2, 1, 0, 0, 0, 3, b'a', b'b', b'c']));

        let back = codec().decode(&Message::new(enc.body)).unwrap();
        assert_eq!(back.get("seq"), Some(&Value::Short(258)));
        assert_eq!(back.get("ok"), Some(&Value::Boolean(true)));
        assert_eq!(back.get("note"), Some(&Value::String("abc".into())));
    }

    #[test]
    fn test_decode_failures() {
        let c = codec();
        assert_eq!(
            c.decode(&Message::new(Body::Bytes(vec![0, 1, 1, 0, 0, 0, 5, b'a']))),
            Err(DiscardReason::UnexpectedEnd)
        );
        assert_eq!(
            c.decode(&Message::new(Body::Bytes(vec![0, 1, 1, 0, 0, 0, 1, 0xff]))),
            Err(DiscardReason::Unreadable)
        );
        assert_eq!(
            c.decode(&Message::new(Body::Bytes(vec![0, 1, 1, 0xff, 0xff, 0xff, 0xff]))),
            Err(DiscardReason::FormatError)
        );
        assert_eq!(
            c.decode(&Message::new(Body::Text("x".into()))),
            Err(DiscardReason::WrongType)
        );
    }
}
