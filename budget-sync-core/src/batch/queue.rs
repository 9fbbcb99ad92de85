//! Durable queue of sealed batches awaiting upload.
//!
//! Each batch is one file, `<batch-id>.batch`, holding the sealed payload.
//! The file name is derived from the batch identity, so persisting the same
//! batch again rewrites the same artifact.

use std::fs;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

use super::{BatchId, SyncBatch};
use crate::codec::{CodecError, EncryptionCodec};
use crate::fs_atomic::write_atomic;

const EXTENSION: &str = "batch";

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("Batch not queued: {0}")]
    NotQueued(BatchId),
}

/// Directory-backed FIFO of sealed batches.
#[derive(Debug, Clone)]
pub struct BatchQueue {
    dir: PathBuf,
    codec: EncryptionCodec,
}

impl BatchQueue {
    pub fn new(dir: impl Into<PathBuf>, codec: EncryptionCodec) -> Self {
        Self {
            dir: dir.into(),
            codec,
        }
    }

    pub fn codec(&self) -> &EncryptionCodec {
        &self.codec
    }

    fn path(&self, id: &BatchId) -> PathBuf {
        self.dir.join(format!("{}.{}", id, EXTENSION))
    }

    fn io_error(path: PathBuf) -> impl FnOnce(io::Error) -> QueueError {
        move |source| QueueError::Io { path, source }
    }

    /// Seals and durably queues a batch, returning its ID.
    pub fn persist(&self, batch: &SyncBatch) -> Result<BatchId, QueueError> {
        let id = batch.id();
        let sealed = batch.seal(&self.codec)?;
        let path = self.path(&id);

        write_atomic(&path, &sealed).map_err(Self::io_error(path))?;
        Ok(id)
    }

    /// Queued batch IDs, oldest first.
    pub fn list_pending(&self) -> Result<Vec<BatchId>, QueueError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Self::io_error(self.dir.clone())(e)),
        };

        let mut ids = Vec::new();
        for entry in entries {
            let entry = entry.map_err(Self::io_error(self.dir.clone()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            // Foreign files in the queue directory are ignored
            if let Some(id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<BatchId>().ok())
            {
                ids.push(id);
            }
        }

        ids.sort();
        Ok(ids)
    }

    /// Newest queued batch, if any.
    pub fn latest(&self) -> Result<Option<BatchId>, QueueError> {
        Ok(self.list_pending()?.pop())
    }

    pub fn len(&self) -> Result<usize, QueueError> {
        Ok(self.list_pending()?.len())
    }

    pub fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.len()? == 0)
    }

    /// Returns the sealed artifact exactly as queued.
    pub fn read_sealed(&self, id: &BatchId) -> Result<Vec<u8>, QueueError> {
        let path = self.path(id);
        match fs::read(&path) {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(QueueError::NotQueued(*id)),
            Err(e) => Err(Self::io_error(path)(e)),
        }
    }

    /// Reads, verifies and decodes a queued batch.
    pub fn load(&self, id: &BatchId) -> Result<SyncBatch, QueueError> {
        let sealed = self.read_sealed(id)?;
        Ok(SyncBatch::open(&self.codec, &sealed)?)
    }

    /// Removes a queued batch. Purging an absent batch is a no-op.
    pub fn purge(&self, id: &BatchId) -> Result<(), QueueError> {
        let path = self.path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(path)(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::{BatchAssembler, BatchChange};
    use crate::codec::InstallKey;
    use crate::device::DeviceId;
    use crate::models::{DataType, VersionedRecord};
    use serde_json::json;
    use tempfile::TempDir;
    use uuid::Uuid;

    fn test_queue() -> (BatchQueue, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let codec = EncryptionCodec::new(Some(InstallKey::generate()));
        let queue = BatchQueue::new(temp_dir.path().join("outbox"), codec);
        (queue, temp_dir)
    }

    fn batch(assembler: &BatchAssembler, device: DeviceId, n: i64) -> SyncBatch {
        assembler.record(
            DataType::Transaction,
            VersionedRecord::wrap(Uuid::new_v4(), json!({"amount": n}), device),
        );
        assembler.assemble(device, None).unwrap()
    }

    #[test]
    fn test_list_pending_missing_dir_is_empty() {
        let (queue, _temp) = test_queue();
        assert!(queue.list_pending().unwrap().is_empty());
        assert!(queue.is_empty().unwrap());
        assert!(queue.latest().unwrap().is_none());
    }

    #[test]
    fn test_persist_and_load() {
        let (queue, _temp) = test_queue();
        let assembler = BatchAssembler::new();
        let batch = batch(&assembler, DeviceId::new(), 1);

        let id = queue.persist(&batch).unwrap();
        assert_eq!(id, batch.id());
        assert_eq!(queue.load(&id).unwrap(), batch);
    }

    #[test]
    fn test_persist_is_idempotent() {
        let (queue, _temp) = test_queue();
        let assembler = BatchAssembler::new();
        let batch = batch(&assembler, DeviceId::new(), 1);

        queue.persist(&batch).unwrap();
        let first = queue.read_sealed(&batch.id()).unwrap();
        queue.persist(&batch).unwrap();

        assert_eq!(queue.len().unwrap(), 1);
        assert_eq!(queue.read_sealed(&batch.id()).unwrap(), first);
    }

    #[test]
    fn test_list_pending_is_fifo() {
        let (queue, _temp) = test_queue();
        let assembler = BatchAssembler::new();
        let device = DeviceId::new();

        let batches: Vec<SyncBatch> = (0..5).map(|n| batch(&assembler, device, n)).collect();
        // Persist out of order; listing must still follow creation order
        for b in batches.iter().rev() {
            queue.persist(b).unwrap();
        }

        let expected: Vec<BatchId> = batches.iter().map(|b| b.id()).collect();
        assert_eq!(queue.list_pending().unwrap(), expected);
        assert_eq!(queue.latest().unwrap(), expected.last().copied());
    }

    #[test]
    fn test_purge_removes_only_that_batch() {
        let (queue, _temp) = test_queue();
        let assembler = BatchAssembler::new();
        let device = DeviceId::new();

        let ids: Vec<BatchId> = (0..4)
            .map(|n| queue.persist(&batch(&assembler, device, n)).unwrap())
            .collect();

        queue.purge(&ids[1]).unwrap();

        assert_eq!(queue.list_pending().unwrap(), vec![ids[0], ids[2], ids[3]]);
        assert!(matches!(queue.load(&ids[1]), Err(QueueError::NotQueued(_))));
    }

    #[test]
    fn test_purge_absent_is_noop() {
        let (queue, _temp) = test_queue();
        let id = BatchId::new(DeviceId::new(), chrono::Utc::now());
        assert!(queue.purge(&id).is_ok());
    }

    #[test]
    fn test_tampered_artifact_fails_load() {
        let (queue, _temp) = test_queue();
        let assembler = BatchAssembler::new();
        let id = queue.persist(&batch(&assembler, DeviceId::new(), 7)).unwrap();

        let path = queue.path(&id);
        let mut bytes = fs::read(&path).unwrap();
        bytes[70] ^= 0x01;
        fs::write(&path, bytes).unwrap();

        assert!(matches!(
            queue.load(&id),
            Err(QueueError::Codec(CodecError::Integrity(_)))
        ));
    }

    #[test]
    fn test_foreign_files_are_ignored() {
        let (queue, temp) = test_queue();
        let dir = temp.path().join("outbox");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("notes.txt"), "hi").unwrap();
        fs::write(dir.join("garbage.batch"), "hi").unwrap();

        let change = BatchChange {
            data_type: DataType::Account,
            record: VersionedRecord::wrap(Uuid::new_v4(), json!({}), DeviceId::new()),
        };
        let batch = SyncBatch {
            origin_device: change.record.origin_device,
            created_at: crate::batch::truncate_micros(chrono::Utc::now()),
            changes: vec![change],
        };
        queue.persist(&batch).unwrap();

        assert_eq!(queue.list_pending().unwrap(), vec![batch.id()]);
    }
}
