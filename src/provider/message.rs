//! # Provider-level message model.
//!
//! A [`Message`] is what crosses the provider boundary: broker-assigned
//! identity (`id`, `timestamp`), the `redelivered` flag, typed application
//! properties and a [`Body`].
//!
//! Property and body values are drawn from the closed [`Value`] enumeration,
//! matching the native types a codec schema may declare.

use std::collections::BTreeMap;

/// A typed scalar or byte/string value.
#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Boolean(bool),
    Bytes(Vec<u8>),
    String(String),
}

impl Value {
    /// Name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Byte(_) => "byte",
            Value::Short(_) => "short",
            Value::Int(_) => "int",
            Value::Long(_) => "long",
            Value::Float(_) => "float",
            Value::Double(_) => "double",
            Value::Boolean(_) => "boolean",
            Value::Bytes(_) => "bytes",
            Value::String(_) => "string",
        }
    }

    /// Returns the string payload, if this is a [`Value::String`].
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Widens any integral value to `i64`.
    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            Value::Byte(v) => Some(i64::from(v)),
            Value::Short(v) => Some(i64::from(v)),
            Value::Int(v) => Some(i64::from(v)),
            Value::Long(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a [`Value::Boolean`].
    pub fn as_bool(&self) -> Option<bool> {
        match *self {
            Value::Boolean(b) => Some(b),
            _ => None,
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<Vec<u8>> for Value {
    fn from(v: Vec<u8>) -> Self {
        Value::Bytes(v)
    }
}

/// Message payload.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Body {
    /// No payload (control messages).
    #[default]
    Empty,
    Text(String),
    Bytes(Vec<u8>),
    /// Named entries, unordered on the wire.
    Map(BTreeMap<String, Value>),
    /// Positional entries.
    Stream(Vec<Value>),
}

impl Body {
    /// Returns a short stable label for the body kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Body::Empty => "empty",
            Body::Text(_) => "text",
            Body::Bytes(_) => "bytes",
            Body::Map(_) => "map",
            Body::Stream(_) => "stream",
        }
    }
}

/// How the provider keeps a message.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DeliveryMode {
    NonPersistent,
    #[default]
    Persistent,
}

impl DeliveryMode {
    /// Numeric code as JMS providers report it (`1` non-persistent, `2` persistent).
    pub fn code(&self) -> i32 {
        match self {
            DeliveryMode::NonPersistent => 1,
            DeliveryMode::Persistent => 2,
        }
    }
}

/// Priority a message gets unless the sender sets one.
pub const DEFAULT_PRIORITY: u8 = 4;

/// A provider message.
///
/// `id`, `timestamp` and `destination` are assigned by the provider on send when
/// left empty/zero.
///
/// ## Example
/// ```rust
/// use mqbridge::{Body, Message, Value};
///
/// let msg = Message::new(Body::Text("hello".into()))
///     .with_property("region", "eu")
///     .with_correlation_id("req-7")
///     .with_timestamp(100);
///
/// assert_eq!(msg.property("region"), Some(&Value::String("eu".into())));
/// assert_eq!(msg.correlation_id.as_deref(), Some("req-7"));
/// assert_eq!(msg.timestamp, 100);
/// assert_eq!(msg.priority, 4);
/// assert!(!msg.redelivered);
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Provider-assigned message id (e.g. `"ID:42"`).
    pub id: String,
    /// Provider timestamp in milliseconds since the epoch.
    pub timestamp: i64,
    /// Set when the provider delivers the message again after a recover, rollback or reconnect.
    pub redelivered: bool,
    /// Queue the message was sent to.
    pub destination: String,
    pub delivery_mode: DeliveryMode,
    /// Expiration time in milliseconds since the epoch; `0` never expires.
    pub expiration: i64,
    /// `0..=9`.
    pub priority: u8,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    /// Application-defined message type.
    pub message_type: Option<String>,
    /// Application properties.
    pub properties: BTreeMap<String, Value>,
    pub body: Body,
}

impl Default for Message {
    fn default() -> Self {
        Self {
            id: String::new(),
            timestamp: 0,
            redelivered: false,
            destination: String::new(),
            delivery_mode: DeliveryMode::default(),
            expiration: 0,
            priority: DEFAULT_PRIORITY,
            correlation_id: None,
            reply_to: None,
            message_type: None,
            properties: BTreeMap::new(),
            body: Body::default(),
        }
    }
}

impl Message {
    /// Creates a message with the given body and no properties.
    pub fn new(body: Body) -> Self {
        Self {
            body,
            ..Self::default()
        }
    }

    #[inline]
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    #[inline]
    pub fn with_reply_to(mut self, queue: impl Into<String>) -> Self {
        self.reply_to = Some(queue.into());
        self
    }

    #[inline]
    pub fn with_type(mut self, message_type: impl Into<String>) -> Self {
        self.message_type = Some(message_type.into());
        self
    }

    /// Sets the priority, capped at 9.
    #[inline]
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority.min(9);
        self
    }

    #[inline]
    pub fn with_expiration(mut self, expiration: i64) -> Self {
        self.expiration = expiration;
        self
    }

    #[inline]
    pub fn with_delivery_mode(mut self, mode: DeliveryMode) -> Self {
        self.delivery_mode = mode;
        self
    }

    /// Attaches an application property.
    #[inline]
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// Presets the message id.
    #[inline]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Presets the message timestamp (ms).
    #[inline]
    pub fn with_timestamp(mut self, timestamp: i64) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Returns an application property.
    pub fn property(&self, name: &str) -> Option<&Value> {
        self.properties.get(name)
    }
}
