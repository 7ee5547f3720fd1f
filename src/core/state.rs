//! # Checkpoint callbacks.
//!
//! The host calls [`StateHandler`] at checkpoint boundaries of a consistent
//! region. Each call gets or returns a [`Checkpoint`]: its sequence id plus at
//! most one opaque snapshot record, written atomically.

use async_trait::async_trait;

use crate::error::{BridgeError, CheckpointError};

/// One checkpoint of the region.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    sequence_id: u64,
    data: Option<Vec<u8>>,
}

impl Checkpoint {
    pub fn new(sequence_id: u64) -> Self {
        Self {
            sequence_id,
            data: None,
        }
    }

    /// A checkpoint restored by the host, carrying the snapshot written earlier.
    pub fn restored(sequence_id: u64, data: Vec<u8>) -> Self {
        Self {
            sequence_id,
            data: Some(data),
        }
    }

    pub fn sequence_id(&self) -> u64 {
        self.sequence_id
    }

    pub fn data(&self) -> Option<&[u8]> {
        self.data.as_deref()
    }

    /// Stores the snapshot; a checkpoint holds at most one.
    pub fn write(&mut self, data: Vec<u8>) -> Result<(), CheckpointError> {
        if self.data.is_some() {
            return Err(CheckpointError::AlreadyWritten {
                checkpoint_id: self.sequence_id,
            });
        }
        self.data = Some(data);
        Ok(())
    }
}

/// Checkpoint lifecycle callbacks invoked by the host.
#[async_trait]
pub trait StateHandler: Send + Sync {
    /// Persists the endpoint's state for `checkpoint`.
    async fn checkpoint(&self, checkpoint: &mut Checkpoint) -> Result<(), BridgeError>;

    /// Called before a checkpoint once the input is quiescent.
    async fn drain(&self) -> Result<(), BridgeError>;

    /// Restores the state stored in `checkpoint`.
    async fn reset(&self, checkpoint: &Checkpoint) -> Result<(), BridgeError>;

    /// Restores the state the endpoint had before its first checkpoint.
    async fn reset_to_initial_state(&self) -> Result<(), BridgeError>;

    /// The host no longer needs `id`.
    async fn retire_checkpoint(&self, id: u64) -> Result<(), BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkpoint_holds_a_single_snapshot() {
        let mut cp = Checkpoint::new(3);
        assert!(cp.data().is_none());
        cp.write(b"one".to_vec()).unwrap();
        assert_eq!(
            cp.write(b"two".to_vec()),
            Err(CheckpointError::AlreadyWritten { checkpoint_id: 3 })
        );
        assert_eq!(cp.data(), Some(&b"one"[..]));
    }
}
