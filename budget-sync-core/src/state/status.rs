//! The observable state of the sync engine.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::batch::BatchId;
use crate::conflict::SyncConflict;

/// Sync lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    #[default]
    Idle,
    Checking,
    Uploading,
    Downloading,
    Reconciling,
    Completed,
    Failed,
    /// Conflicts await an explicit resolution from the host
    ConflictPending,
}

impl SyncStatus {
    /// True while a cycle is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncStatus::Checking
                | SyncStatus::Uploading
                | SyncStatus::Downloading
                | SyncStatus::Reconciling
        )
    }
}

impl std::fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncStatus::Idle => "idle",
            SyncStatus::Checking => "checking",
            SyncStatus::Uploading => "uploading",
            SyncStatus::Downloading => "downloading",
            SyncStatus::Reconciling => "reconciling",
            SyncStatus::Completed => "completed",
            SyncStatus::Failed => "failed",
            SyncStatus::ConflictPending => "conflict pending",
        };
        f.write_str(s)
    }
}

/// Category of a recorded sync failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing or rejected credentials; needs the user to sign in again
    Auth,
    /// Transport failure that outlasted the retry budget
    Network,
    /// A sealed batch failed verification
    Integrity,
    /// Settings that leave the cycle without a way forward
    Config,
    Cancelled,
    /// Local disk or record store failure
    Storage,
}

/// A failure as shown to the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl SyncFailure {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl std::fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

/// Process-wide sync state, persisted on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct SyncState {
    pub status: SyncStatus,
    pub last_sync_attempt: Option<DateTime<Utc>>,
    pub last_successful_sync: Option<DateTime<Utc>>,
    pub current_operation: Option<String>,
    pub progress_percent: u8,
    pub conflicts: Vec<SyncConflict>,
    /// Local changes not yet delivered by a completed cycle. Resolutions
    /// committed with `resolve_conflict` are counted here until the next
    /// cycle uploads them.
    pub pending_changes: usize,
    pub error: Option<SyncFailure>,
    /// Uploaded batches whose purge waits for the cycle to complete
    pub awaiting_purge: Vec<BatchId>,
    /// Start of the cycle that is running or awaiting conflict resolution
    pub cycle_started_at: Option<DateTime<Utc>>,
    /// Provider receipt time of the newest downloaded batch
    pub download_cursor: Option<DateTime<Utc>>,
    /// Batches returned by the last download, skipped when listed again
    pub downloaded_batches: BTreeSet<BatchId>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_states() {
        assert!(SyncStatus::Uploading.is_active());
        assert!(SyncStatus::Reconciling.is_active());
        assert!(!SyncStatus::Idle.is_active());
        assert!(!SyncStatus::ConflictPending.is_active());
        assert!(!SyncStatus::Failed.is_active());
    }

    #[test]
    fn test_state_deserializes_from_empty_object() {
        let state: SyncState = serde_json::from_str("{}").unwrap();
        assert_eq!(state, SyncState::default());
        assert_eq!(state.status, SyncStatus::Idle);
    }

    #[test]
    fn test_failure_display() {
        let failure = SyncFailure::new(ErrorKind::Auth, "not authenticated");
        assert_eq!(failure.to_string(), "Auth: not authenticated");
    }
}
