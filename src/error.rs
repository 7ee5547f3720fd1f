//! Error types used by the mqbridge endpoints.
//!
//! This module defines one error enum per failure class:
//!
//! - [`ProviderError`] — raised by a broker provider client (connect, session operations).
//! - [`ConnectionError`] — raised by the [`ConnectionSupervisor`](crate::ConnectionSupervisor).
//! - [`CheckpointError`] — violations of the checkpoint protocol.
//! - [`ConfigError`] — configuration rejected before any connection is made.
//! - [`EncodeError`] — a record could not be converted into a message.
//! - [`BridgeError`] — umbrella returned by endpoint operations.
//!
//! Every type provides `as_label` (stable snake_case label for logs/metrics).
//! Conversion failures on the read side are not errors: they are reported as a
//! [`DiscardReason`](crate::DiscardReason) and never abort the loop.

use thiserror::Error;

/// # Errors reported by a provider client.
///
/// The provider owns the wire protocol; the endpoints only care whether the
/// session is still usable.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// The broker refused or could not be reached while opening a session.
    #[error("connection refused: {reason}")]
    Refused {
        /// Provider-specific detail.
        reason: String,
    },

    /// The connection under an open session was lost.
    #[error("connection lost: {reason}")]
    ConnectionLost {
        /// Provider-specific detail.
        reason: String,
    },

    /// The session was closed locally.
    #[error("session closed")]
    SessionClosed,

    /// The message selector could not be parsed.
    #[error("invalid selector: {reason}")]
    InvalidSelector {
        /// Parser detail.
        reason: String,
    },

    /// The session does not support this operation (e.g. `commit` on a non-transacted session).
    #[error("{op} is not supported by a {mode} session")]
    Unsupported {
        /// Operation name.
        op: &'static str,
        /// Acknowledgement mode of the session.
        mode: &'static str,
    },

    /// No control queue was configured for the session.
    #[error("session has no control queue")]
    NoControlQueue,
}

impl ProviderError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ProviderError::Refused { .. } => "provider_refused",
            ProviderError::ConnectionLost { .. } => "provider_connection_lost",
            ProviderError::SessionClosed => "provider_session_closed",
            ProviderError::InvalidSelector { .. } => "provider_invalid_selector",
            ProviderError::Unsupported { .. } => "provider_unsupported",
            ProviderError::NoControlQueue => "provider_no_control_queue",
        }
    }

    /// True when the session behind this error can no longer be used.
    ///
    /// # Example
    /// ```
    /// use mqbridge::ProviderError;
    ///
    /// let lost = ProviderError::ConnectionLost { reason: "reset by peer".into() };
    /// assert!(lost.is_connection_loss());
    /// assert!(!ProviderError::NoControlQueue.is_connection_loss());
    /// ```
    pub fn is_connection_loss(&self) -> bool {
        matches!(
            self,
            ProviderError::Refused { .. }
                | ProviderError::ConnectionLost { .. }
                | ProviderError::SessionClosed
        )
    }
}

/// # Errors produced by the connection supervisor.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectionError {
    /// An operation was attempted while no session is open.
    #[error("not connected")]
    NotConnected,

    /// The retry policy gave up; this is fatal for the endpoint.
    #[error("connection attempts exhausted after {attempts} attempt(s): {last}")]
    Exhausted {
        /// Number of connection attempts made (including the first).
        attempts: u32,
        /// Error returned by the final attempt.
        last: ProviderError,
    },

    /// Shutdown was requested while connecting or waiting between attempts.
    #[error("connection canceled")]
    Canceled,

    /// A session operation failed.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl ConnectionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use mqbridge::ConnectionError;
    ///
    /// assert_eq!(ConnectionError::NotConnected.as_label(), "connection_not_connected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            ConnectionError::NotConnected => "connection_not_connected",
            ConnectionError::Exhausted { .. } => "connection_exhausted",
            ConnectionError::Canceled => "connection_canceled",
            ConnectionError::Provider(_) => "connection_provider",
        }
    }

    /// True if the endpoint cannot continue: the policy gave up or shutdown is in progress.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConnectionError::Exhausted { .. } | ConnectionError::Canceled
        )
    }
}

/// # Checkpoint protocol violations.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    /// The previously committed marker is gone although an earlier checkpoint succeeded.
    #[error(
        "checkpoint {checkpoint_id}: marker of last successful checkpoint {last_successful} not found"
    )]
    MissingMarker {
        /// Checkpoint being taken.
        checkpoint_id: u64,
        /// Last checkpoint this writer committed.
        last_successful: u64,
    },

    /// A control message did not carry valid marker properties.
    #[error("malformed checkpoint marker: {reason}")]
    MalformedMarker {
        /// What was wrong with it.
        reason: String,
    },

    /// The reader snapshot could not be written or read.
    #[error("reader snapshot: {reason}")]
    Snapshot {
        /// Serialization detail.
        reason: String,
    },

    /// A snapshot was already written into this checkpoint.
    #[error("checkpoint {checkpoint_id} already holds a snapshot")]
    AlreadyWritten {
        /// Checkpoint id.
        checkpoint_id: u64,
    },
}

impl CheckpointError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CheckpointError::MissingMarker { .. } => "checkpoint_missing_marker",
            CheckpointError::MalformedMarker { .. } => "checkpoint_malformed_marker",
            CheckpointError::Snapshot { .. } => "checkpoint_snapshot",
            CheckpointError::AlreadyWritten { .. } => "checkpoint_already_written",
        }
    }
}

/// # Configuration rejected at initialization.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A single field has an unusable value.
    #[error("invalid `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },

    /// The native schema cannot be represented by the chosen message class.
    #[error("unsupported schema for {class} messages: {reason}")]
    Schema {
        /// Message class label.
        class: &'static str,
        /// Why the schema was rejected.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Invalid { .. } => "config_invalid",
            ConfigError::Schema { .. } => "config_schema",
        }
    }
}

/// # A record could not be encoded into a message.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodeError {
    /// The record has no field the schema requires.
    #[error("missing field `{name}`")]
    MissingField {
        /// Field name.
        name: String,
    },

    /// The record field does not hold the type the schema declares.
    #[error("field `{name}`: expected {expected}, found {found}")]
    TypeMismatch {
        /// Field name.
        name: String,
        /// Declared native type.
        expected: &'static str,
        /// Actual value type.
        found: &'static str,
    },

    /// A string or byte field is too long for the binary length prefix.
    #[error("field of {len} bytes exceeds the length prefix")]
    TooLarge {
        /// Payload length in bytes.
        len: usize,
    },
}

impl EncodeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            EncodeError::MissingField { .. } => "encode_missing_field",
            EncodeError::TypeMismatch { .. } => "encode_type_mismatch",
            EncodeError::TooLarge { .. } => "encode_too_large",
        }
    }
}

/// The host stopped accepting records on a port.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("port closed")]
pub struct PortClosed;

/// # Errors returned by endpoint operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Checkpoint(#[from] CheckpointError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The output port was closed by the host.
    #[error("output {0}")]
    Output(#[from] PortClosed),
}

impl BridgeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use mqbridge::{BridgeError, ConnectionError};
    ///
    /// let err = BridgeError::from(ConnectionError::Canceled);
    /// assert_eq!(err.as_label(), "connection_canceled");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BridgeError::Connection(e) => e.as_label(),
            BridgeError::Checkpoint(e) => e.as_label(),
            BridgeError::Config(e) => e.as_label(),
            BridgeError::Encode(e) => e.as_label(),
            BridgeError::Output(_) => "output_closed",
        }
    }
}

impl From<ProviderError> for BridgeError {
    fn from(err: ProviderError) -> Self {
        BridgeError::Connection(ConnectionError::Provider(err))
    }
}
