//! # Provider boundary.
//!
//! The broker wire protocol is delegated to a provider client. The endpoints
//! see it through two traits:
//!
//! - [`Provider`] opens sessions from [`SessionOptions`].
//! - [`ProviderSession`] is one open session: data-queue send/receive,
//!   control-queue send/receive and transaction/acknowledgement control.
//!
//! ```text
//! ConnectionSupervisor ── connect(&SessionOptions) ──► Provider
//!          │                                              │
//!          └──────── owns Box<dyn ProviderSession> ◄──────┘
//! ```
//!
//! [`MemoryBroker`] is an in-process provider with transacted, client-ack and
//! auto-ack sessions, selectors, redelivery and failure injection.

mod memory;
mod message;
mod selector;

pub use memory::MemoryBroker;
pub use message::{Body, DEFAULT_PRIORITY, DeliveryMode, Message, Value};
pub use selector::Selector;

use std::time::Duration;

use async_trait::async_trait;

use crate::error::ProviderError;

/// How received messages are acknowledged.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckMode {
    /// Messages are consumed on receipt.
    Auto,
    /// Messages stay in flight until [`ProviderSession::acknowledge`]; `recover` redelivers them.
    Client,
    /// Sends and receives take effect on [`ProviderSession::commit`].
    Transacted,
}

impl AckMode {
    /// Returns a short stable label for logs and errors.
    pub fn as_label(&self) -> &'static str {
        match self {
            AckMode::Auto => "auto_ack",
            AckMode::Client => "client_ack",
            AckMode::Transacted => "transacted",
        }
    }
}

/// Control queue attached to a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ControlQueue {
    pub name: String,
    /// Selector applied by `receive_control`.
    pub selector: Option<String>,
}

/// Everything a provider needs to open a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOptions {
    /// Data queue/topic name.
    pub destination: String,
    pub ack_mode: AckMode,
    /// Selector applied by `receive` on the data destination.
    pub selector: Option<String>,
    pub control: Option<ControlQueue>,
}

impl SessionOptions {
    /// Options for a plain session on `destination`.
    pub fn new(destination: impl Into<String>, ack_mode: AckMode) -> Self {
        Self {
            destination: destination.into(),
            ack_mode,
            selector: None,
            control: None,
        }
    }

    #[inline]
    pub fn with_selector(mut self, selector: Option<String>) -> Self {
        self.selector = selector;
        self
    }

    #[inline]
    pub fn with_control(mut self, name: impl Into<String>, selector: Option<String>) -> Self {
        self.control = Some(ControlQueue {
            name: name.into(),
            selector,
        });
        self
    }
}

/// A provider client that can open sessions.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Opens one session. Each call is one connection attempt.
    async fn connect(
        &self,
        options: &SessionOptions,
    ) -> Result<Box<dyn ProviderSession>, ProviderError>;
}

/// One open broker session.
///
/// Implementations need not be internally synchronized; the supervisor
/// serializes every call behind one lock.
#[async_trait]
pub trait ProviderSession: Send + 'static {
    /// Sends to the data destination.
    async fn send(&mut self, message: Message) -> Result<(), ProviderError>;

    /// Receives from the data destination, waiting up to `timeout`.
    async fn receive(&mut self, timeout: Duration) -> Result<Option<Message>, ProviderError>;

    /// Sends to the control queue.
    async fn send_control(&mut self, message: Message) -> Result<(), ProviderError>;

    /// Receives from the control queue (with its selector), waiting up to `timeout`.
    async fn receive_control(
        &mut self,
        timeout: Duration,
    ) -> Result<Option<Message>, ProviderError>;

    /// Acknowledges every message delivered so far (client-ack sessions).
    async fn acknowledge(&mut self) -> Result<(), ProviderError>;

    /// Commits the current transaction.
    async fn commit(&mut self) -> Result<(), ProviderError>;

    /// Rolls back the current transaction.
    async fn rollback(&mut self) -> Result<(), ProviderError>;

    /// Redelivers every unacknowledged message.
    async fn recover(&mut self) -> Result<(), ProviderError>;

    /// Closes the session. Uncommitted and unacknowledged work is released.
    async fn close(&mut self) -> Result<(), ProviderError>;
}
