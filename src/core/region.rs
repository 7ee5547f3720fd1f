//! # Consistent-region context.
//!
//! The host runtime coordinates checkpoints across a region of operators. A
//! reader inside a region sees it through [`RegionContext`]:
//!
//! - `acquire_permit()` — the data loop holds a [`RegionPermit`] for one cycle;
//!   the host takes the permit away to checkpoint or reset;
//! - `is_trigger()` / `make_consistent()` — the trigger reader asks the region
//!   to establish a consistent state every `trigger_count` messages;
//! - `request_reset()` — an endpoint asks for a region-wide reset after a
//!   session failure.
//!
//! [`RegionGate`] is a semaphore-backed implementation for embedders without a
//! host runtime of their own (and for tests).
//!
//! ```text
//!   reader loop                         host
//!   ───────────                         ────
//!   acquire_permit() ◄──── 1 permit ───► gate.hold()
//!   receive/emit                          checkpoint()/reset()
//!   drop(permit)                          drop(hold)
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::{Notify, OwnedSemaphorePermit, Semaphore};

/// Proof that the holder may run one data-loop cycle. Released on drop.
#[derive(Debug)]
pub struct RegionPermit {
    _permit: Option<OwnedSemaphorePermit>,
}

impl RegionPermit {
    pub fn new(permit: OwnedSemaphorePermit) -> Self {
        Self {
            _permit: Some(permit),
        }
    }

    /// A permit that guards nothing (for contexts without a barrier).
    pub fn detached() -> Self {
        Self { _permit: None }
    }
}

/// The host's consistent-region interface.
#[async_trait]
pub trait RegionContext: Send + Sync + 'static {
    /// Waits for the right to run one cycle; `None` once the region shut down.
    async fn acquire_permit(&self) -> Option<RegionPermit>;

    /// True if this endpoint triggers the region's checkpoints.
    fn is_trigger(&self) -> bool;

    /// Asks the region to establish a consistent state.
    fn make_consistent(&self);

    /// Asks the region for a reset.
    fn request_reset(&self);
}

/// Semaphore-backed [`RegionContext`].
///
/// ## Example
/// ```rust
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// use mqbridge::{RegionContext, RegionGate};
///
/// let gate = RegionGate::new(true);
/// let permit = gate.acquire_permit().await.unwrap();
/// drop(permit);
///
/// let hold = gate.hold().await.unwrap();   // the loop now waits
/// drop(hold);
///
/// gate.make_consistent();
/// assert_eq!(gate.consistency_requests(), 1);
/// # }
/// ```
#[derive(Debug)]
pub struct RegionGate {
    permits: Arc<Semaphore>,
    trigger: bool,
    consistency_requests: AtomicU64,
    reset_requests: AtomicU64,
    consistency: Notify,
    reset: Notify,
}

impl RegionGate {
    pub fn new(trigger: bool) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(1)),
            trigger,
            consistency_requests: AtomicU64::new(0),
            reset_requests: AtomicU64::new(0),
            consistency: Notify::new(),
            reset: Notify::new(),
        }
    }

    /// Takes the permit so no data-loop cycle runs until the guard is dropped.
    ///
    /// Waits for the cycle in progress to finish; `None` once closed.
    pub async fn hold(&self) -> Option<OwnedSemaphorePermit> {
        Arc::clone(&self.permits).acquire_owned().await.ok()
    }

    /// Shuts the region down; pending and future `acquire_permit` calls return `None`.
    pub fn close(&self) {
        self.permits.close();
    }

    pub fn consistency_requests(&self) -> u64 {
        self.consistency_requests.load(Ordering::Acquire)
    }

    pub fn reset_requests(&self) -> u64 {
        self.reset_requests.load(Ordering::Acquire)
    }

    /// Resolves after the next (or a pending) `make_consistent` call.
    pub async fn consistency_requested(&self) {
        self.consistency.notified().await;
    }

    /// Resolves after the next (or a pending) `request_reset` call.
    pub async fn reset_requested(&self) {
        self.reset.notified().await;
    }
}

#[async_trait]
impl RegionContext for RegionGate {
    async fn acquire_permit(&self) -> Option<RegionPermit> {
        self.hold().await.map(RegionPermit::new)
    }

    fn is_trigger(&self) -> bool {
        self.trigger
    }

    fn make_consistent(&self) {
        self.consistency_requests.fetch_add(1, Ordering::AcqRel);
        self.consistency.notify_one();
    }

    fn request_reset(&self) {
        self.reset_requests.fetch_add(1, Ordering::AcqRel);
        self.reset.notify_one();
    }
}
