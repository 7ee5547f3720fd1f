//! # Endpoint configuration.
//!
//! Provides [`WriterConfig`] and [`ReaderConfig`], populated by the host's
//! configuration loader (both are serde-deserializable) and checked with
//! `validate()` before any connection is attempted.
//!
//! ## Sentinel values
//! - `retry = None` → [`RetryPolicy::default`] (`BoundedRetry { 5, 60s }`)
//! - `resend = None` → no same-session resends
//! - `trigger_count = None` → the reader never asks the region to checkpoint
//!
//! ## Rules
//! - A writer inside a consistent region needs a non-empty `control_queue` and
//!   must not configure `retry` or `resend`: the region owns recovery.
//! - A writer outside a region must not configure `control_queue`.
//! - A reader inside a region must not configure `retry`; it opens its
//!   session with a single attempt and leaves recovery to the region reset.
//! - A reader acting as region trigger needs `trigger_count > 0`
//!   (checked by the endpoint, which knows the region role).
//! - Property mappings: no empty names, no property or field mapped twice,
//!   no `Bytes` type. A writer field that is also a schema field must have the
//!   mapped type; a reader field must not collide with the schema or header
//!   fields, since it is appended to the decoded record.
//!
//! ## Durations
//! Retry periods deserialize from seconds (fractional allowed), resend delays and
//! receive timeouts from milliseconds.

use std::time::Duration;

use serde::Deserialize;

use crate::codec::{MessageClass, NativeField, NativeType};
use crate::error::ConfigError;
use crate::policies::{ResendPolicy, RetryPolicy};
use crate::provider::Selector;

const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_millis(500);

pub(crate) mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, de};

    pub fn deserialize<'de, D>(de: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let v = f64::deserialize(de)?;
        Duration::try_from_secs_f64(v)
            .map_err(|e| de::Error::custom(format!("invalid period {v}: {e}")))
    }
}

pub(crate) mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(de: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(de).map(Duration::from_millis)
    }
}

fn default_receive_timeout() -> Duration {
    DEFAULT_RECEIVE_TIMEOUT
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() {
        return Err(ConfigError::invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Record fields that receive message header values on the reader.
///
/// Each configured name is appended to the decoded record:
///
/// | Header           | Type    | Appended                 |
/// |------------------|---------|--------------------------|
/// | `message_id`     | String  | always                   |
/// | `timestamp`      | Long    | always                   |
/// | `redelivered`    | Boolean | always                   |
/// | `destination`    | String  | always                   |
/// | `delivery_mode`  | Int     | always (`1`/`2`)         |
/// | `expiration`     | Long    | always                   |
/// | `priority`       | Int     | always                   |
/// | `correlation_id` | String  | only when the message has one |
/// | `reply_to`       | String  | only when the message has one |
/// | `message_type`   | String  | only when the message has one |
#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct HeaderMapping {
    pub message_id: Option<String>,
    pub timestamp: Option<String>,
    pub redelivered: Option<String>,
    pub destination: Option<String>,
    pub delivery_mode: Option<String>,
    pub expiration: Option<String>,
    pub priority: Option<String>,
    pub correlation_id: Option<String>,
    pub reply_to: Option<String>,
    pub message_type: Option<String>,
}

impl HeaderMapping {
    fn names(&self) -> impl Iterator<Item = &str> {
        [
            &self.message_id,
            &self.timestamp,
            &self.redelivered,
            &self.destination,
            &self.delivery_mode,
            &self.expiration,
            &self.priority,
            &self.correlation_id,
            &self.reply_to,
            &self.message_type,
        ]
        .into_iter()
        .filter_map(|n| n.as_deref())
    }

    fn validate(&self, schema: &[NativeField]) -> Result<(), ConfigError> {
        let mut seen: Vec<&str> = Vec::new();
        for name in self.names() {
            require_non_empty("headers", name)?;
            if seen.contains(&name) || schema.iter().any(|f| f.name == name) {
                return Err(ConfigError::invalid(
                    "headers",
                    format!("field `{name}` is mapped more than once"),
                ));
            }
            seen.push(name);
        }
        Ok(())
    }
}

/// One application property copied between a message and a record field.
///
/// The writer sets `property` from the record's `field`; the reader appends
/// `field` from the message's `property`. Values convert to `type` as
/// [`NativeType::coerce`] does; a missing or unconvertible value skips that
/// property and the record/message is still delivered.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct PropertyMapping {
    pub property: String,
    pub field: String,
    #[serde(rename = "type")]
    pub kind: NativeType,
}

impl PropertyMapping {
    pub fn new(property: impl Into<String>, field: impl Into<String>, kind: NativeType) -> Self {
        Self {
            property: property.into(),
            field: field.into(),
            kind,
        }
    }
}

/// Shared checks; `taken` are field names the mapping must not reuse.
fn validate_properties<'a>(
    mappings: &'a [PropertyMapping],
    taken: impl Fn(&str) -> bool,
) -> Result<(), ConfigError> {
    let mut properties: Vec<&'a str> = Vec::new();
    let mut fields: Vec<&'a str> = Vec::new();
    for m in mappings {
        require_non_empty("properties", &m.property)?;
        require_non_empty("properties", &m.field)?;
        if m.kind == NativeType::Bytes {
            return Err(ConfigError::invalid(
                "properties",
                format!("property `{}`: bytes is not a property type", m.property),
            ));
        }
        if properties.contains(&m.property.as_str()) {
            return Err(ConfigError::invalid(
                "properties",
                format!("property `{}` is mapped more than once", m.property),
            ));
        }
        if fields.contains(&m.field.as_str()) || taken(&m.field) {
            return Err(ConfigError::invalid(
                "properties",
                format!("field `{}` is mapped more than once", m.field),
            ));
        }
        properties.push(&m.property);
        fields.push(&m.field);
    }
    Ok(())
}

/// Configuration of an outbound endpoint.
///
/// ## Field semantics
/// - `operator_id`: name written into checkpoint markers; unique per writer sharing a control queue
/// - `destination`: queue/topic to deliver to
/// - `class` / `schema`: message shape produced by the codec
/// - `retry`: connection policy (outside a region only)
/// - `resend`: same-session resends per message (outside a region only)
/// - `control_queue`: queue holding checkpoint markers (inside a region only)
/// - `consistent_region`: whether the host runs this writer inside a consistent region
/// - `properties`: record fields copied onto message properties
#[derive(Clone, Debug, Deserialize)]
pub struct WriterConfig {
    pub operator_id: String,
    pub destination: String,
    pub class: MessageClass,
    pub schema: Vec<NativeField>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default)]
    pub resend: Option<ResendPolicy>,
    #[serde(default)]
    pub control_queue: Option<String>,
    #[serde(default)]
    pub consistent_region: bool,
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
}

impl WriterConfig {
    /// Writer outside any region with default policies.
    pub fn new(
        operator_id: impl Into<String>,
        destination: impl Into<String>,
        class: MessageClass,
        schema: Vec<NativeField>,
    ) -> Self {
        Self {
            operator_id: operator_id.into(),
            destination: destination.into(),
            class,
            schema,
            retry: None,
            resend: None,
            control_queue: None,
            consistent_region: false,
            properties: Vec::new(),
        }
    }

    /// Moves the writer into a consistent region with the given control queue.
    pub fn in_region(mut self, control_queue: impl Into<String>) -> Self {
        self.consistent_region = true;
        self.control_queue = Some(control_queue.into());
        self
    }

    /// Effective connection policy; `NoRetry` inside a region.
    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.consistent_region {
            RetryPolicy::NoRetry
        } else {
            self.retry.unwrap_or_default()
        }
    }

    /// Effective resend policy; none inside a region.
    #[inline]
    pub fn resend_policy(&self) -> ResendPolicy {
        if self.consistent_region {
            ResendPolicy::default()
        } else {
            self.resend.unwrap_or_default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("operator_id", &self.operator_id)?;
        require_non_empty("destination", &self.destination)?;

        if self.consistent_region {
            match self.control_queue.as_deref() {
                Some(q) => require_non_empty("control_queue", q)?,
                None => {
                    return Err(ConfigError::invalid(
                        "control_queue",
                        "required inside a consistent region",
                    ));
                }
            }
            if self.retry.is_some() {
                return Err(ConfigError::invalid(
                    "retry",
                    "not allowed inside a consistent region",
                ));
            }
            if self.resend.is_some() {
                return Err(ConfigError::invalid(
                    "resend",
                    "not allowed inside a consistent region",
                ));
            }
        } else if self.control_queue.is_some() {
            return Err(ConfigError::invalid(
                "control_queue",
                "only allowed inside a consistent region",
            ));
        }

        validate_properties(&self.properties, |_| false)?;
        for m in &self.properties {
            let Some(field) = self.schema.iter().find(|f| f.name == m.field) else {
                continue;
            };
            if field.kind != m.kind {
                return Err(ConfigError::invalid(
                    "properties",
                    format!(
                        "field `{}` is {}, property `{}` is {}",
                        m.field,
                        field.kind.name(),
                        m.property,
                        m.kind.name()
                    ),
                ));
            }
        }
        Ok(())
    }
}

/// Configuration of an inbound endpoint.
///
/// ## Field semantics
/// - `selector`: optional message selector on the source destination
/// - `receive_timeout`: how long one receive waits; also bounds the dedup drain
/// - `trigger_count`: messages between `make_consistent` requests when the reader triggers the region
/// - `headers`: message header values copied into the record
/// - `properties`: message properties copied into the record
#[derive(Clone, Debug, Deserialize)]
pub struct ReaderConfig {
    pub operator_id: String,
    pub destination: String,
    pub class: MessageClass,
    pub schema: Vec<NativeField>,
    #[serde(default)]
    pub selector: Option<String>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
    #[serde(default = "default_receive_timeout", deserialize_with = "millis::deserialize")]
    pub receive_timeout: Duration,
    #[serde(default)]
    pub trigger_count: Option<u64>,
    #[serde(default)]
    pub headers: HeaderMapping,
    #[serde(default)]
    pub properties: Vec<PropertyMapping>,
    #[serde(default)]
    pub consistent_region: bool,
}

impl ReaderConfig {
    /// Reader outside any region with default policies.
    pub fn new(
        operator_id: impl Into<String>,
        destination: impl Into<String>,
        class: MessageClass,
        schema: Vec<NativeField>,
    ) -> Self {
        Self {
            operator_id: operator_id.into(),
            destination: destination.into(),
            class,
            schema,
            selector: None,
            retry: None,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            trigger_count: None,
            headers: HeaderMapping::default(),
            properties: Vec::new(),
            consistent_region: false,
        }
    }

    /// Moves the reader into a consistent region.
    pub fn in_region(mut self, trigger_count: Option<u64>) -> Self {
        self.consistent_region = true;
        self.trigger_count = trigger_count;
        self
    }

    /// Effective connection policy; `NoRetry` inside a region.
    #[inline]
    pub fn retry_policy(&self) -> RetryPolicy {
        if self.consistent_region {
            RetryPolicy::NoRetry
        } else {
            self.retry.unwrap_or_default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        require_non_empty("operator_id", &self.operator_id)?;
        require_non_empty("destination", &self.destination)?;

        if self.receive_timeout.is_zero() {
            return Err(ConfigError::invalid("receive_timeout", "must be positive"));
        }
        if let Some(sel) = &self.selector {
            Selector::parse(sel).map_err(|e| ConfigError::invalid("selector", e.to_string()))?;
        }
        if self.trigger_count == Some(0) {
            return Err(ConfigError::invalid("trigger_count", "must be positive"));
        }
        if self.trigger_count.is_some() && !self.consistent_region {
            return Err(ConfigError::invalid(
                "trigger_count",
                "only allowed inside a consistent region",
            ));
        }
        if self.consistent_region && self.retry.is_some() {
            return Err(ConfigError::invalid(
                "retry",
                "not allowed inside a consistent region",
            ));
        }
        self.headers.validate(&self.schema)?;
        validate_properties(&self.properties, |name| {
            self.schema.iter().any(|f| f.name == name) || self.headers.names().any(|n| n == name)
        })
    }
}
