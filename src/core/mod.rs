//! Endpoint core: session supervision and the host-facing seams.
//!
//! - [`connection`]: [`ConnectionSupervisor`], one supervised session with retry policy;
//! - [`region`]: [`RegionContext`] (host consistent region) and the [`RegionGate`] implementation;
//! - [`port`]: [`OutputPort`] / [`ErrorPort`] the host receives records and failures on;
//! - [`state`]: [`StateHandler`] checkpoint callbacks and [`Checkpoint`].

pub mod connection;
pub mod port;
pub mod region;
pub mod state;

pub use connection::ConnectionSupervisor;
pub use port::{DeliveryFailure, ErrorPort, OutputPort};
pub use region::{RegionContext, RegionGate, RegionPermit};
pub use state::{Checkpoint, StateHandler};
