//! # Record ⇄ message conversion.
//!
//! A [`MessageCodec`] converts a [`Record`] into a provider [`Message`] body and
//! back. Codecs are built from a native schema (a list of [`NativeField`]s) for
//! one [`MessageClass`]; a schema the class cannot represent is rejected at
//! construction time with [`ConfigError::Schema`].
//!
//! ```text
//! Record ──encode──► Encoded { body, truncated } ──► Message
//! Message ──decode──► Record | DiscardReason
//! ```
//!
//! ## Rules
//! - Bounded `String`/`Bytes` fields are truncated to their `length` on encode;
//!   the result reports it once per record (`Encoded::truncated`).
//! - Decode never fails hard: an unusable message yields a [`DiscardReason`]
//!   and the reader drops it.

mod bytes;
mod empty;
mod map;
mod stream;
mod text;

pub use bytes::BytesCodec;
pub use empty::EmptyCodec;
pub use map::MapCodec;
pub use stream::StreamCodec;
pub use text::TextCodec;

use std::sync::Arc;

use serde::Deserialize;

use crate::error::{ConfigError, EncodeError};
use crate::provider::{Body, Message, Value};

/// Native field types a schema may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum NativeType {
    Byte,
    Short,
    Int,
    Long,
    Float,
    Double,
    Boolean,
    Bytes,
    String,
}

impl NativeType {
    pub fn name(&self) -> &'static str {
        match self {
            NativeType::Byte => "byte",
            NativeType::Short => "short",
            NativeType::Int => "int",
            NativeType::Long => "long",
            NativeType::Float => "float",
            NativeType::Double => "double",
            NativeType::Boolean => "boolean",
            NativeType::Bytes => "bytes",
            NativeType::String => "string",
        }
    }

    /// True if `value` is of this type.
    pub fn accepts(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (NativeType::Byte, Value::Byte(_))
                | (NativeType::Short, Value::Short(_))
                | (NativeType::Int, Value::Int(_))
                | (NativeType::Long, Value::Long(_))
                | (NativeType::Float, Value::Float(_))
                | (NativeType::Double, Value::Double(_))
                | (NativeType::Boolean, Value::Boolean(_))
                | (NativeType::Bytes, Value::Bytes(_))
                | (NativeType::String, Value::String(_))
        )
    }

    /// Only `Bytes` and `String` may carry a length bound.
    pub fn is_bounded(&self) -> bool {
        matches!(self, NativeType::Bytes | NativeType::String)
    }

    /// Converts `value` to this type the way message properties convert:
    /// integers and floats widen, strings parse, anything scalar prints as a
    /// string. `None` if there is no such conversion.
    ///
    /// ```rust
    /// use mqbridge::{NativeType, Value};
    ///
    /// assert_eq!(NativeType::Long.coerce(&Value::Short(3)), Some(Value::Long(3)));
    /// assert_eq!(NativeType::Int.coerce(&Value::String("12".into())), Some(Value::Int(12)));
    /// assert_eq!(NativeType::Short.coerce(&Value::Int(1)), None);
    /// ```
    pub fn coerce(&self, value: &Value) -> Option<Value> {
        if self.accepts(value) {
            return Some(value.clone());
        }
        let parsed = |s: &str| -> Option<Value> {
            let s = s.trim();
            Some(match self {
                NativeType::Byte => Value::Byte(s.parse().ok()?),
                NativeType::Short => Value::Short(s.parse().ok()?),
                NativeType::Int => Value::Int(s.parse().ok()?),
                NativeType::Long => Value::Long(s.parse().ok()?),
                NativeType::Float => Value::Float(s.parse().ok()?),
                NativeType::Double => Value::Double(s.parse().ok()?),
                NativeType::Boolean => Value::Boolean(s.eq_ignore_ascii_case("true")),
                NativeType::Bytes | NativeType::String => return None,
            })
        };
        match (self, value) {
            (NativeType::String, Value::Bytes(_)) => None,
            (NativeType::String, v) => Some(Value::String(scalar_text(v)?)),
            (_, Value::String(s)) => parsed(s),
            (NativeType::Short, Value::Byte(v)) => Some(Value::Short(i16::from(*v))),
            (NativeType::Int, Value::Byte(v)) => Some(Value::Int(i32::from(*v))),
            (NativeType::Int, Value::Short(v)) => Some(Value::Int(i32::from(*v))),
            (NativeType::Long, v) => v.as_i64().map(Value::Long),
            (NativeType::Double, Value::Float(v)) => Some(Value::Double(f64::from(*v))),
            _ => None,
        }
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    Some(match value {
        Value::Byte(v) => v.to_string(),
        Value::Short(v) => v.to_string(),
        Value::Int(v) => v.to_string(),
        Value::Long(v) => v.to_string(),
        Value::Float(v) => v.to_string(),
        Value::Double(v) => v.to_string(),
        Value::Boolean(v) => v.to_string(),
        Value::String(v) => v.clone(),
        Value::Bytes(_) => return None,
    })
}

/// One schema entry.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct NativeField {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: NativeType,
    /// Maximum length (characters for strings, bytes for byte arrays).
    #[serde(default)]
    pub length: Option<usize>,
}

impl NativeField {
    pub fn new(name: impl Into<String>, kind: NativeType) -> Self {
        Self {
            name: name.into(),
            kind,
            length: None,
        }
    }

    #[inline]
    pub fn with_length(mut self, length: usize) -> Self {
        self.length = Some(length);
        self
    }
}

/// Message body shape produced by a codec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
pub enum MessageClass {
    Map,
    Stream,
    Text,
    Bytes,
    /// Header-only messages; the schema is empty.
    Empty,
}

impl MessageClass {
    pub fn as_label(&self) -> &'static str {
        match self {
            MessageClass::Map => "map",
            MessageClass::Stream => "stream",
            MessageClass::Text => "text",
            MessageClass::Bytes => "bytes",
            MessageClass::Empty => "empty",
        }
    }

    /// Builds the codec for this class over `schema`.
    pub fn codec(self, schema: &[NativeField]) -> Result<Arc<dyn MessageCodec>, ConfigError> {
        Ok(match self {
            MessageClass::Map => Arc::new(MapCodec::new(schema.to_vec())?),
            MessageClass::Stream => Arc::new(StreamCodec::new(schema.to_vec())?),
            MessageClass::Text => Arc::new(TextCodec::new(schema.to_vec())?),
            MessageClass::Bytes => Arc::new(BytesCodec::new(schema.to_vec())?),
            MessageClass::Empty => Arc::new(EmptyCodec::new(schema.to_vec())?),
        })
    }
}

/// An ordered list of named values.
///
/// ## Example
/// ```rust
/// use mqbridge::{Record, Value};
///
/// let rec = Record::new().with("id", 7_i64).with("note", "hi");
/// assert_eq!(rec.get("id"), Some(&Value::Long(7)));
/// assert_eq!(rec.len(), 2);
/// ```
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Record {
    fields: Vec<(String, Value)>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a field.
    #[inline]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(name, value);
        self
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.push((name.into(), value.into()));
    }

    /// First field with the given name.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v)
    }

    pub fn fields(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(n, v)| (n.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

/// Output of [`MessageCodec::encode`].
#[derive(Clone, Debug, PartialEq)]
pub struct Encoded {
    pub body: Body,
    /// At least one bounded field was cut to its length.
    pub truncated: bool,
}

/// Why an inbound message was dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscardReason {
    /// The body is not of the class the reader expects.
    WrongType,
    /// The body ended before all schema fields were read.
    UnexpectedEnd,
    /// The payload could not be read (e.g. bytes that are not UTF-8).
    Unreadable,
    /// A field is missing or of the wrong type.
    FormatError,
}

impl DiscardReason {
    pub fn as_label(&self) -> &'static str {
        match self {
            DiscardReason::WrongType => "wrong_type",
            DiscardReason::UnexpectedEnd => "unexpected_end",
            DiscardReason::Unreadable => "unreadable",
            DiscardReason::FormatError => "format_error",
        }
    }
}

impl std::fmt::Display for DiscardReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Converter between records and message bodies.
pub trait MessageCodec: Send + Sync + 'static {
    fn class(&self) -> MessageClass;

    fn encode(&self, record: &Record) -> Result<Encoded, EncodeError>;

    fn decode(&self, message: &Message) -> Result<Record, DiscardReason>;
}

/// Checks the rules every class shares: non-empty, unique names, bounds only on bounded types.
fn check_schema(class: MessageClass, schema: &[NativeField]) -> Result<(), ConfigError> {
    let reject = |reason: String| ConfigError::Schema {
        class: class.as_label(),
        reason,
    };
    if schema.is_empty() {
        return Err(reject("schema has no fields".into()));
    }
    for (i, field) in schema.iter().enumerate() {
        if field.name.trim().is_empty() {
            return Err(reject(format!("field #{i} has an empty name")));
        }
        if schema[..i].iter().any(|f| f.name == field.name) {
            return Err(reject(format!("duplicate field `{}`", field.name)));
        }
        match field.length {
            Some(0) => return Err(reject(format!("field `{}` has length 0", field.name))),
            Some(_) if !field.kind.is_bounded() => {
                return Err(reject(format!(
                    "field `{}` of type {} cannot have a length",
                    field.name,
                    field.kind.name()
                )));
            }
            _ => {}
        }
    }
    Ok(())
}

/// Cuts a bounded value to `length`; reports whether anything was removed.
fn truncate(value: Value, length: Option<usize>) -> (Value, bool) {
    let Some(n) = length else {
        return (value, false);
    };
    match value {
        Value::String(s) if s.chars().count() > n => {
            (Value::String(s.chars().take(n).collect()), true)
        }
        Value::Bytes(mut b) if b.len() > n => {
            b.truncate(n);
            (Value::Bytes(b), true)
        }
        other => (other, false),
    }
}

/// Looks up and type-checks every schema field of `record`, truncating bounded values.
fn project(
    schema: &[NativeField],
    record: &Record,
) -> Result<(Vec<(String, Value)>, bool), EncodeError> {
    let mut out = Vec::with_capacity(schema.len());
    let mut truncated = false;
    for field in schema {
        let value = record
            .get(&field.name)
            .ok_or_else(|| EncodeError::MissingField {
                name: field.name.clone(),
            })?;
        if !field.kind.accepts(value) {
            return Err(EncodeError::TypeMismatch {
                name: field.name.clone(),
                expected: field.kind.name(),
                found: value.type_name(),
            });
        }
        let (value, cut) = truncate(value.clone(), field.length);
        truncated |= cut;
        out.push((field.name.clone(), value));
    }
    Ok((out, truncated))
}
