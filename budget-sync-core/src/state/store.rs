//! Persistence for the canonical [`SyncState`] and [`SyncConfig`].
//!
//! The store is constructed once at startup, handed to the orchestrator and
//! shut down with the process. It carries no business rules: callers
//! describe changes, the store applies them under a lock and writes the
//! result to disk before returning.
//!
//! ```text
//! <state_dir>/
//!   sync_state.json
//!   sync_config.json
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, warn};

use super::{SyncConfig, SyncConfigPatch, SyncState, SyncStatus};
use crate::fs_atomic::write_atomic;

const STATE_FILE: &str = "sync_state.json";
const CONFIG_FILE: &str = "sync_config.json";

#[derive(Error, Debug)]
pub enum StateStoreError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Sync state lock poisoned")]
    LockPoisoned,
}

/// Owner of the single sync state and config instance.
#[derive(Debug)]
pub struct SyncStateStore {
    dir: PathBuf,
    state: RwLock<SyncState>,
    config: RwLock<SyncConfig>,
}

impl SyncStateStore {
    /// Loads state and config from `dir`, using defaults for missing files.
    ///
    /// A cycle that was running when the process stopped cannot resume, so
    /// an in-cycle status found on disk is reset to idle.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StateStoreError> {
        let dir = dir.into();
        let mut state: SyncState = read_json(&dir.join(STATE_FILE))?.unwrap_or_default();
        let config: SyncConfig = read_json(&dir.join(CONFIG_FILE))?.unwrap_or_default();

        if state.status.is_active() {
            warn!(status = %state.status, "Previous sync cycle was interrupted");
            state.status = SyncStatus::Idle;
            state.current_operation = None;
            state.progress_percent = 0;
            state.awaiting_purge.clear();
            state.cycle_started_at = None;
        }

        let store = Self {
            dir,
            state: RwLock::new(state),
            config: RwLock::new(config),
        };
        store.persist_all()?;
        Ok(store)
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Snapshot of the current state.
    pub fn state(&self) -> SyncState {
        self.state
            .read()
            .map(|s| s.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Snapshot of the current config.
    pub fn config(&self) -> SyncConfig {
        self.config
            .read()
            .map(|c| c.clone())
            .unwrap_or_else(|e| e.into_inner().clone())
    }

    /// Applies `f` to the state, persists it and returns the new snapshot.
    pub fn update_state<F>(&self, f: F) -> Result<SyncState, StateStoreError>
    where
        F: FnOnce(&mut SyncState),
    {
        let mut state = self.state.write().map_err(|_| StateStoreError::LockPoisoned)?;
        f(&mut state);
        write_json(&self.dir.join(STATE_FILE), &*state)?;
        Ok(state.clone())
    }

    /// Overlays `patch` on the stored config, persists it and returns the result.
    pub fn update_config(&self, patch: &SyncConfigPatch) -> Result<SyncConfig, StateStoreError> {
        let mut config = self
            .config
            .write()
            .map_err(|_| StateStoreError::LockPoisoned)?;
        patch.apply(&mut config);
        write_json(&self.dir.join(CONFIG_FILE), &*config)?;
        debug!(?patch, "Sync config updated");
        Ok(config.clone())
    }

    /// Atomically moves a resting state into `Checking`.
    ///
    /// Returns `Ok(None)` without touching anything when a cycle is already
    /// running or conflicts are waiting for resolution.
    pub fn try_begin_cycle(&self) -> Result<Option<SyncState>, StateStoreError> {
        let mut state = self.state.write().map_err(|_| StateStoreError::LockPoisoned)?;
        if state.status.is_active() || state.status == SyncStatus::ConflictPending {
            return Ok(None);
        }

        let now = Utc::now();
        state.status = SyncStatus::Checking;
        state.last_sync_attempt = Some(now);
        state.cycle_started_at = Some(now);
        state.current_operation = Some("Checking sync prerequisites".to_string());
        state.progress_percent = 0;
        state.error = None;
        state.awaiting_purge.clear();

        write_json(&self.dir.join(STATE_FILE), &*state)?;
        Ok(Some(state.clone()))
    }

    /// Flushes both documents to disk and releases the store.
    pub fn shutdown(self) -> Result<(), StateStoreError> {
        self.persist_all()
    }

    fn persist_all(&self) -> Result<(), StateStoreError> {
        write_json(&self.dir.join(STATE_FILE), &self.state())?;
        write_json(&self.dir.join(CONFIG_FILE), &self.config())
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>, StateStoreError> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StateStoreError::Parse {
                path: path.to_path_buf(),
                message: e.to_string(),
            }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StateStoreError::Io {
            path: path.to_path_buf(),
            source,
        }),
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), StateStoreError> {
    let bytes = serde_json::to_vec_pretty(value).map_err(|e| StateStoreError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    write_atomic(path, &bytes).map_err(|source| StateStoreError::Io {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ConflictStrategy;
    use crate::state::{ErrorKind, SyncFailure};
    use tempfile::TempDir;

    #[test]
    fn test_open_empty_dir_uses_defaults() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();

        assert_eq!(store.state(), SyncState::default());
        assert_eq!(store.config(), SyncConfig::default());
        assert!(temp.path().join(STATE_FILE).exists());
        assert!(temp.path().join(CONFIG_FILE).exists());
    }

    #[test]
    fn test_update_state_persists() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();

        let updated = store
            .update_state(|s| {
                s.status = SyncStatus::Failed;
                s.error = Some(SyncFailure::new(ErrorKind::Network, "timeout"));
                s.pending_changes = 4;
            })
            .unwrap();
        assert_eq!(updated.pending_changes, 4);
        store.shutdown().unwrap();

        let reopened = SyncStateStore::open(temp.path()).unwrap();
        assert_eq!(reopened.state().status, SyncStatus::Failed);
        assert_eq!(reopened.state().pending_changes, 4);
        assert_eq!(reopened.state().error.unwrap().kind, ErrorKind::Network);
    }

    #[test]
    fn test_update_config_is_read_modify_write() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();

        store
            .update_config(&SyncConfigPatch {
                max_sync_retries: Some(9),
                ..Default::default()
            })
            .unwrap();
        let config = store
            .update_config(&SyncConfigPatch {
                conflict_strategy: Some(ConflictStrategy::UseLocal),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(config.max_sync_retries, 9);
        assert_eq!(config.conflict_strategy, ConflictStrategy::UseLocal);
        drop(store);

        let reopened = SyncStateStore::open(temp.path()).unwrap();
        assert_eq!(reopened.config(), config);
    }

    #[test]
    fn test_interrupted_cycle_resets_to_idle() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();
        store
            .update_state(|s| {
                s.status = SyncStatus::Uploading;
                s.progress_percent = 30;
            })
            .unwrap();
        drop(store);

        let reopened = SyncStateStore::open(temp.path()).unwrap();
        assert_eq!(reopened.state().status, SyncStatus::Idle);
        assert_eq!(reopened.state().progress_percent, 0);
    }

    #[test]
    fn test_conflict_pending_survives_restart() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();
        store
            .update_state(|s| s.status = SyncStatus::ConflictPending)
            .unwrap();
        drop(store);

        let reopened = SyncStateStore::open(temp.path()).unwrap();
        assert_eq!(reopened.state().status, SyncStatus::ConflictPending);
    }

    #[test]
    fn test_try_begin_cycle_is_exclusive() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();

        let begun = store.try_begin_cycle().unwrap().unwrap();
        assert_eq!(begun.status, SyncStatus::Checking);
        assert!(begun.last_sync_attempt.is_some());

        assert!(store.try_begin_cycle().unwrap().is_none());
        assert_eq!(store.state(), begun);
    }

    #[test]
    fn test_try_begin_cycle_blocked_by_pending_conflicts() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();
        store
            .update_state(|s| s.status = SyncStatus::ConflictPending)
            .unwrap();

        assert!(store.try_begin_cycle().unwrap().is_none());
    }

    #[test]
    fn test_try_begin_cycle_clears_previous_error() {
        let temp = TempDir::new().unwrap();
        let store = SyncStateStore::open(temp.path()).unwrap();
        store
            .update_state(|s| {
                s.status = SyncStatus::Failed;
                s.error = Some(SyncFailure::new(ErrorKind::Auth, "not authenticated"));
            })
            .unwrap();

        let begun = store.try_begin_cycle().unwrap().unwrap();
        assert!(begun.error.is_none());
    }

    #[test]
    fn test_corrupt_state_file() {
        let temp = TempDir::new().unwrap();
        fs::write(temp.path().join(STATE_FILE), "nope").unwrap();

        let err = SyncStateStore::open(temp.path()).unwrap_err();
        assert!(matches!(err, StateStoreError::Parse { .. }));
    }
}
