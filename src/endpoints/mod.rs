//! Host-facing endpoints.
//!
//! - [`WriterEndpoint`]: outbound, resend/reconnect outside a region, marker protocol inside one;
//! - [`ReaderEndpoint`]: inbound loop, client-ack with dedup tracking inside a region.
//!
//! Both implement [`StateHandler`](crate::StateHandler) for the host's consistent region.

mod reader;
mod writer;

pub use reader::{Cycle, ReaderBuilder, ReaderEndpoint};
pub use writer::{CONTROL_RECEIVE_TIMEOUT, WriterBuilder, WriterEndpoint};
