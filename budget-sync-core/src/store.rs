//! Local record storage.
//!
//! Records are kept per data type in `<data_dir>/records/<type>s.json`, a
//! JSON map of record ID to versioned record. The orchestrator and the
//! domain write API both go through the `RecordStore` trait.
//!
//! Every change is a read-modify-write under [`RecordStore::update`]. The
//! file store holds an OS lock on `<data_dir>/records/records.lock` for the
//! duration, so a CLI write and a running `sync watch` never interleave.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use uuid::Uuid;

use crate::fs_atomic::write_atomic;
use crate::models::{DataType, SyncRecord};

/// Durable local copy of every record this device knows about.
pub trait RecordStore: Send + Sync {
    /// Returns the record, tombstoned or not.
    fn get(&self, data_type: DataType, id: Uuid) -> Result<Option<SyncRecord>, StorageError>;

    /// Runs `change` on the stored record (or `None`) and stores what it
    /// returns, as one step that no other writer can interleave with.
    /// Returning `None` leaves the store untouched. A record older than the
    /// stored one is refused with [`StorageError::StaleVersion`].
    fn update(
        &self,
        data_type: DataType,
        id: Uuid,
        change: &mut dyn FnMut(Option<SyncRecord>) -> Option<SyncRecord>,
    ) -> Result<(), StorageError>;

    /// Inserts or replaces a record.
    fn put(&self, data_type: DataType, record: SyncRecord) -> Result<(), StorageError> {
        let id = record.id;
        let mut record = Some(record);
        self.update(data_type, id, &mut |_| record.take())
    }

    /// Returns every record of a type, including tombstones.
    fn list(&self, data_type: DataType) -> Result<Vec<SyncRecord>, StorageError>;
}

/// Errors that can occur during record storage operations.
#[derive(Debug)]
pub enum StorageError {
    /// I/O error reading or writing a file.
    IoError(PathBuf, io::Error),
    /// Error parsing a stored record file.
    ParseError(PathBuf, String),
    /// A lock guarding the store was poisoned by a panicking writer.
    LockPoisoned,
    /// A write would have replaced a record with an older version.
    StaleVersion {
        id: Uuid,
        stored: u64,
        attempted: u64,
    },
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::IoError(path, e) => {
                write!(f, "I/O error for {}: {}", path.display(), e)
            }
            StorageError::ParseError(path, e) => {
                write!(f, "Failed to parse records {}: {}", path.display(), e)
            }
            StorageError::LockPoisoned => write!(f, "Record store lock poisoned"),
            StorageError::StaleVersion {
                id,
                stored,
                attempted,
            } => write!(
                f,
                "Refusing to replace record {} version {} with older version {}",
                id, stored, attempted
            ),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::IoError(_, e) => Some(e),
            _ => None,
        }
    }
}

type RecordMap = BTreeMap<Uuid, SyncRecord>;

const LOCK_FILE: &str = "records.lock";

/// File-backed record store, one JSON file per data type.
#[derive(Debug)]
pub struct FileRecordStore {
    dir: PathBuf,
    // Serializes read-modify-write within this process; the lock file
    // covers other processes.
    lock: Mutex<()>,
}

impl FileRecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            lock: Mutex::new(()),
        }
    }

    /// Returns the full path for a data type.
    pub fn path(&self, data_type: DataType) -> PathBuf {
        self.dir.join(data_type.filename())
    }

    fn load(&self, data_type: DataType) -> Result<RecordMap, StorageError> {
        let path = self.path(data_type);

        match fs::read(&path) {
            Ok(bytes) => serde_json::from_slice(&bytes)
                .map_err(|e| StorageError::ParseError(path, e.to_string())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(RecordMap::new()),
            Err(e) => Err(StorageError::IoError(path, e)),
        }
    }

    /// Takes the exclusive lock shared with other processes. Released when
    /// the returned file is dropped.
    fn lock_file(&self) -> Result<File, StorageError> {
        fs::create_dir_all(&self.dir).map_err(|e| StorageError::IoError(self.dir.clone(), e))?;
        let path = self.dir.join(LOCK_FILE);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| StorageError::IoError(path.clone(), e))?;
        file.lock().map_err(|e| StorageError::IoError(path, e))?;
        Ok(file)
    }

    fn save(&self, data_type: DataType, records: &RecordMap) -> Result<(), StorageError> {
        let path = self.path(data_type);
        let bytes = serde_json::to_vec_pretty(records)
            .map_err(|e| StorageError::ParseError(path.clone(), e.to_string()))?;

        write_atomic(&path, &bytes).map_err(|e| StorageError::IoError(path, e))
    }
}

impl RecordStore for FileRecordStore {
    fn get(&self, data_type: DataType, id: Uuid) -> Result<Option<SyncRecord>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(self.load(data_type)?.remove(&id))
    }

    fn update(
        &self,
        data_type: DataType,
        id: Uuid,
        change: &mut dyn FnMut(Option<SyncRecord>) -> Option<SyncRecord>,
    ) -> Result<(), StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        let _file_lock = self.lock_file()?;

        let mut records = self.load(data_type)?;
        let current = records.get(&id).cloned();
        let stored_version = current.as_ref().map(|r| r.version);
        let Some(next) = change(current) else {
            return Ok(());
        };

        if let Some(stored) = stored_version {
            if next.version < stored {
                return Err(StorageError::StaleVersion {
                    id,
                    stored,
                    attempted: next.version,
                });
            }
        }
        records.insert(id, next);
        self.save(data_type, &records)
    }

    fn list(&self, data_type: DataType) -> Result<Vec<SyncRecord>, StorageError> {
        let _guard = self.lock.lock().map_err(|_| StorageError::LockPoisoned)?;
        Ok(self.load(data_type)?.into_values().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::models::VersionedRecord;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_store() -> (FileRecordStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let store = FileRecordStore::new(temp_dir.path().join("records"));
        (store, temp_dir)
    }

    #[test]
    fn test_store_path() {
        let (store, _temp) = test_store();
        assert!(store.path(DataType::Payee).ends_with("records/payees.json"));
    }

    #[test]
    fn test_get_missing_returns_none() {
        let (store, _temp) = test_store();
        assert!(store.get(DataType::Account, Uuid::new_v4()).unwrap().is_none());
        assert!(store.list(DataType::Account).unwrap().is_empty());
    }

    #[test]
    fn test_put_and_get() {
        let (store, _temp) = test_store();
        let record = VersionedRecord::wrap(Uuid::new_v4(), json!({"name": "A"}), DeviceId::new());

        store.put(DataType::Account, record.clone()).unwrap();

        assert_eq!(store.get(DataType::Account, record.id).unwrap(), Some(record.clone()));
        assert!(store.get(DataType::Payee, record.id).unwrap().is_none());
    }

    #[test]
    fn test_put_replaces_existing() {
        let (store, _temp) = test_store();
        let device = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), json!(1), device);
        store.put(DataType::Budget, record.clone()).unwrap();
        store.put(DataType::Budget, record.bump(json!(2), device)).unwrap();

        let all = store.list(DataType::Budget).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].version, 2);
        assert_eq!(all[0].payload, json!(2));
    }

    #[test]
    fn test_corrupt_file_is_reported() {
        let (store, _temp) = test_store();
        let path = store.path(DataType::Account);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{not json").unwrap();

        let err = store.list(DataType::Account).unwrap_err();
        assert!(matches!(err, StorageError::ParseError(_, _)));
        assert!(err.to_string().contains("Failed to parse records"));
    }

    #[test]
    fn test_older_version_is_refused() {
        let (store, _temp) = test_store();
        let device = DeviceId::new();
        let v1 = VersionedRecord::wrap(Uuid::new_v4(), json!("first"), device);
        let v2 = v1.clone().bump(json!("second"), device);
        store.put(DataType::Payee, v2.clone()).unwrap();

        let err = store.put(DataType::Payee, v1.clone()).unwrap_err();
        assert!(matches!(
            err,
            StorageError::StaleVersion {
                stored: 2,
                attempted: 1,
                ..
            }
        ));
        assert_eq!(store.get(DataType::Payee, v1.id).unwrap(), Some(v2));
    }

    #[test]
    fn test_update_sees_stored_record() {
        let (store, _temp) = test_store();
        let device = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), json!(1), device);
        store.put(DataType::Budget, record.clone()).unwrap();

        let mut seen = None;
        store
            .update(DataType::Budget, record.id, &mut |current| {
                seen = current.clone();
                current.map(|r| r.bump(json!(2), device))
            })
            .unwrap();
        assert_eq!(seen, Some(record.clone()));
        assert_eq!(store.get(DataType::Budget, record.id).unwrap().unwrap().version, 2);

        // Declining the change keeps the stored record
        store
            .update(DataType::Budget, record.id, &mut |_| None)
            .unwrap();
        assert_eq!(store.get(DataType::Budget, record.id).unwrap().unwrap().version, 2);
    }

    #[test]
    fn test_separate_handles_do_not_lose_updates() {
        let (store, temp) = test_store();
        let device = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), json!(0), device);
        store.put(DataType::Account, record.clone()).unwrap();

        // Two handles on one directory stand in for two processes
        let other = FileRecordStore::new(temp.path().join("records"));
        let id = record.id;
        std::thread::scope(|scope| {
            for handle in [&store, &other] {
                scope.spawn(move || {
                    for _ in 0..25 {
                        handle
                            .update(DataType::Account, id, &mut |current| {
                                current.map(|r| {
                                    let next = r.payload.as_u64().unwrap() + 1;
                                    r.bump(json!(next), device)
                                })
                            })
                            .unwrap();
                    }
                });
            }
        });

        let stored = store.get(DataType::Account, record.id).unwrap().unwrap();
        assert_eq!(stored.version, 51);
        assert_eq!(stored.payload, json!(50));
    }
}
