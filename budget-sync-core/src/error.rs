//! Errors returned to the host by engine calls.
//!
//! Failures inside a sync cycle are not returned here: they are recorded in
//! [`SyncState::error`](crate::state::SyncState) and the call succeeds with
//! the resulting state.

use thiserror::Error;
use uuid::Uuid;

use crate::batch::QueueError;
use crate::models::DataType;
use crate::state::StateStoreError;
use crate::store::StorageError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error(transparent)]
    State(#[from] StateStoreError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error("Invalid record payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("No conflicts are awaiting resolution")]
    NoPendingConflicts,

    #[error("No pending conflict for {data_type} {id}")]
    ConflictNotFound { data_type: DataType, id: Uuid },

    #[error("Manual is not a resolution; choose use_local, use_remote or merge")]
    ManualResolution,

    #[error("{data_type} not found: {id}")]
    RecordNotFound { data_type: DataType, id: Uuid },

    #[error("{data_type} {id} has been deleted")]
    RecordDeleted { data_type: DataType, id: Uuid },
}
