//! Writer-side checkpoint decision.
//!
//! On `checkpoint(seq)` the writer reads back the marker it committed last and
//! decides between committing the current transaction and rolling it back:
//!
//! ```text
//! committed = found marker id, or 0
//! committed == 0 && last > 0          → MissingMarker (marker lost)
//! seq - last > 1 && last < committed  → Rollback (cycle already committed before a rewind)
//! otherwise                           → Commit (send marker(seq), commit)
//! ```

use crate::error::CheckpointError;

use super::marker::CheckpointMarker;

/// Outcome of a writer checkpoint.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MarkerDecision {
    /// Send the new marker and commit the transaction.
    Commit,
    /// Roll back: the records of this cycle were committed before.
    Rollback,
}

/// Protocol state of one writer: the last checkpoint it completed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterCheckpoint {
    last_successful: u64,
}

impl WriterCheckpoint {
    pub fn last_successful(&self) -> u64 {
        self.last_successful
    }

    pub fn decide(
        &self,
        checkpoint_id: u64,
        found: Option<&CheckpointMarker>,
    ) -> Result<MarkerDecision, CheckpointError> {
        let committed = found.map_or(0, |m| m.checkpoint_id);
        let last = self.last_successful;

        if committed == 0 && last > 0 {
            return Err(CheckpointError::MissingMarker {
                checkpoint_id,
                last_successful: last,
            });
        }
        if checkpoint_id.saturating_sub(last) > 1 && last < committed {
            return Ok(MarkerDecision::Rollback);
        }
        Ok(MarkerDecision::Commit)
    }

    /// Records `checkpoint_id` as completed, whichever way it was decided.
    pub fn complete(&mut self, checkpoint_id: u64) {
        self.last_successful = checkpoint_id;
    }

    /// Rewinds to `checkpoint_id` (`0` = initial state).
    pub fn reset_to(&mut self, checkpoint_id: u64) {
        self.last_successful = checkpoint_id;
    }
}
