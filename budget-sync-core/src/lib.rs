//! BudgetSync Core Library
//!
//! Offline-first sync engine for BudgetSync: versioned records, conflict
//! detection and resolution, sealed batch transport and the sync state
//! machine.

pub mod batch;
pub mod codec;
pub mod conflict;
pub mod credentials;
pub mod device;
pub mod error;
mod fs_atomic;
pub mod models;
pub mod orchestrator;
pub mod provider;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod store;
#[cfg(test)]
mod test_support;
pub mod writer;

pub use batch::{BatchAssembler, BatchId, BatchQueue, QueueError, SyncBatch};
pub use codec::{CodecError, EncryptionCodec, InstallKey};
pub use conflict::{detect, SyncConflict};
pub use credentials::{CredentialError, CredentialStore, FileCredentialStore, ProviderAuth};
pub use device::{DeviceId, DeviceIdError};
pub use error::SyncError;
pub use models::{
    Account, AccountKind, DataType, Payee, SyncRecord, Syncable, Transaction, VersionedRecord,
};
pub use orchestrator::{RetryPolicy, SyncOrchestrator, SyncServices, SyncTrigger};
pub use provider::{
    FixedNetwork, FolderProvider, NetworkClass, NetworkMonitor, ProviderError, SealedBatch,
    StorageProvider, UploadAck,
};
pub use resolver::{resolve, ConflictStrategy};
pub use scheduler::SyncScheduler;
pub use state::{
    ErrorKind, ProviderKind, StateStoreError, SyncConfig, SyncConfigPatch, SyncFailure,
    SyncState, SyncStateStore, SyncStatus,
};
pub use store::{FileRecordStore, RecordStore, StorageError};
pub use writer::RecordWriter;

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
