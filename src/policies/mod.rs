//! # Connection and delivery policies.
//!
//! - [`RetryPolicy`] governs connection establishment and reconnection.
//! - [`ResendPolicy`] governs same-session message resends on the writer.

mod resend;
mod retry;

pub use resend::ResendPolicy;
pub use retry::RetryPolicy;
