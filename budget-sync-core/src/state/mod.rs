//! Sync status and settings, and the store that owns them.

mod config;
mod status;
mod store;

pub use config::{ProviderKind, SyncConfig, SyncConfigPatch};
pub use status::{ErrorKind, SyncFailure, SyncState, SyncStatus};
pub use store::{StateStoreError, SyncStateStore};
