//! Relay-side storage for sealed batches.
//!
//! Batches are stored per user:
//! ```text
//! <DATA_DIR>/
//!   <user_id>/
//!     batches/
//!       <received micros>_<batch-id>.batch
//! ```
//!
//! Payloads are stored exactly as uploaded. The relay cannot open them.

use budget_sync_core::BatchId;
use chrono::{DateTime, Duration, Utc};
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const EXTENSION: &str = "batch";

/// A batch as held by the relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredBatch {
    pub id: BatchId,
    pub received_at: DateTime<Utc>,
    pub payload: Vec<u8>,
}

/// Outcome of storing a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Receipt {
    pub received_at: DateTime<Utc>,
    /// False when the batch had already been stored.
    pub created: bool,
}

/// Errors that can occur during relay storage operations.
#[derive(Debug)]
pub enum RelayStorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// Invalid user ID (e.g., contains path separators).
    InvalidUserId(String),
}

impl std::fmt::Display for RelayStorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RelayStorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            RelayStorageError::InvalidUserId(id) => write!(f, "Invalid user ID: {}", id),
        }
    }
}

impl std::error::Error for RelayStorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RelayStorageError::IoError(_, e) => Some(e),
            _ => None,
        }
    }
}

/// Directory-backed batch storage shared by all relay handlers.
///
/// Writes are serialized so receipt times within a user's folder are
/// strictly increasing.
#[derive(Debug)]
pub struct RelayStorage {
    data_dir: PathBuf,
    write_lock: Mutex<()>,
}

#[derive(Debug)]
struct Entry {
    received_at: DateTime<Utc>,
    id: BatchId,
    path: PathBuf,
}

impl RelayStorage {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            write_lock: Mutex::new(()),
        }
    }

    /// Validates a user ID to prevent path traversal attacks.
    fn validate_user_id(user_id: &str) -> Result<(), RelayStorageError> {
        if user_id.is_empty()
            || user_id.contains('/')
            || user_id.contains('\\')
            || user_id.contains("..")
            || user_id.starts_with('.')
        {
            return Err(RelayStorageError::InvalidUserId(user_id.to_string()));
        }
        Ok(())
    }

    fn batches_dir(&self, user_id: &str) -> Result<PathBuf, RelayStorageError> {
        Self::validate_user_id(user_id)?;
        Ok(self.data_dir.join(user_id).join("batches"))
    }

    /// Stores a sealed batch for `user_id`.
    ///
    /// Storing an ID that is already present keeps the first copy and
    /// returns its original receipt time.
    pub fn store(
        &self,
        user_id: &str,
        id: &BatchId,
        payload: &[u8],
    ) -> Result<Receipt, RelayStorageError> {
        let dir = self.batches_dir(user_id)?;
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());

        let existing = Self::scan(&dir)?;
        if let Some(entry) = existing.iter().find(|e| e.id == *id) {
            return Ok(Receipt {
                received_at: entry.received_at,
                created: false,
            });
        }

        let now = Utc::now();
        let mut received_at = DateTime::from_timestamp_micros(now.timestamp_micros()).unwrap_or(now);
        if let Some(last) = existing.last() {
            if received_at <= last.received_at {
                received_at = last.received_at + Duration::microseconds(1);
            }
        }

        fs::create_dir_all(&dir).map_err(|e| RelayStorageError::IoError(dir.clone(), e))?;

        let path = dir.join(format!(
            "{:020}_{}.{}",
            received_at.timestamp_micros(),
            id,
            EXTENSION
        ));

        // Write atomically using temp file + rename
        let temp_path = path.with_extension("batch.tmp");
        let mut file = File::create(&temp_path)
            .map_err(|e| RelayStorageError::IoError(temp_path.clone(), e))?;
        file.write_all(payload)
            .map_err(|e| RelayStorageError::IoError(temp_path.clone(), e))?;
        file.sync_all()
            .map_err(|e| RelayStorageError::IoError(temp_path.clone(), e))?;
        fs::rename(&temp_path, &path).map_err(|e| RelayStorageError::IoError(path.clone(), e))?;

        tracing::debug!(user = user_id, batch = %id, "Stored batch");
        Ok(Receipt {
            received_at,
            created: true,
        })
    }

    /// Returns the user's batches received strictly after `since`, in
    /// receipt order.
    pub fn since(
        &self,
        user_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<StoredBatch>, RelayStorageError> {
        let dir = self.batches_dir(user_id)?;

        let mut batches = Vec::new();
        for entry in Self::scan(&dir)? {
            if since.is_some_and(|since| entry.received_at <= since) {
                continue;
            }
            let payload =
                fs::read(&entry.path).map_err(|e| RelayStorageError::IoError(entry.path.clone(), e))?;
            batches.push(StoredBatch {
                id: entry.id,
                received_at: entry.received_at,
                payload,
            });
        }
        Ok(batches)
    }

    fn scan(dir: &Path) -> Result<Vec<Entry>, RelayStorageError> {
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(RelayStorageError::IoError(dir.to_path_buf(), e)),
        };

        let mut entries = Vec::new();
        for item in read_dir {
            let item = item.map_err(|e| RelayStorageError::IoError(dir.to_path_buf(), e))?;
            if let Some(entry) = parse_entry(item.path()) {
                entries.push(entry);
            }
        }
        entries.sort_by(|a, b| a.received_at.cmp(&b.received_at).then_with(|| a.id.cmp(&b.id)));
        Ok(entries)
    }
}

fn parse_entry(path: PathBuf) -> Option<Entry> {
    if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
        return None;
    }
    let stem = path.file_stem()?.to_str()?;
    let (received, id) = stem.split_once('_')?;
    Some(Entry {
        received_at: DateTime::from_timestamp_micros(received.parse().ok()?)?,
        id: id.parse().ok()?,
        path,
    })
}
