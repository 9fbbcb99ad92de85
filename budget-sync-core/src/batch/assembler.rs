//! Accumulates local changes between batches.

use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};

use super::{truncate_micros, BatchChange, SyncBatch};
use crate::device::DeviceId;
use crate::models::{DataType, SyncRecord};

#[derive(Debug, Default)]
struct Pending {
    changes: Vec<BatchChange>,
    last_created_at: Option<DateTime<Utc>>,
}

/// Thread-safe buffer of changes waiting to be assembled into a batch.
///
/// Writers may keep recording while a sync cycle runs: `assemble` takes a
/// snapshot under the lock, so anything recorded afterwards simply lands in
/// the next batch.
#[derive(Debug, Default)]
pub struct BatchAssembler {
    pending: Mutex<Pending>,
}

impl BatchAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a change. A newer change to the same record replaces the
    /// pending one in place.
    pub fn record(&self, data_type: DataType, record: SyncRecord) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());

        let existing = pending
            .changes
            .iter_mut()
            .find(|c| c.data_type == data_type && c.record.id == record.id);

        match existing {
            Some(change) if change.record.version <= record.version => change.record = record,
            Some(_) => {}
            None => pending.changes.push(BatchChange { data_type, record }),
        }
    }

    /// Number of changes not yet assembled.
    pub fn pending_count(&self) -> usize {
        self.pending
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .changes
            .len()
    }

    /// Snapshots and drains all pending changes into a batch.
    ///
    /// `after` is the creation time of the newest batch already queued; the
    /// new batch is always created strictly later than it and than any batch
    /// this assembler produced before, keeping batch IDs unique and ordered.
    pub fn assemble(&self, device: DeviceId, after: Option<DateTime<Utc>>) -> Option<SyncBatch> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        if pending.changes.is_empty() {
            return None;
        }

        let mut created_at = truncate_micros(Utc::now());
        for floor in [after, pending.last_created_at].into_iter().flatten() {
            if created_at <= floor {
                created_at = floor + Duration::microseconds(1);
            }
        }
        pending.last_created_at = Some(created_at);

        Some(SyncBatch {
            origin_device: device,
            created_at,
            changes: std::mem::take(&mut pending.changes),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::VersionedRecord;
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_assemble_empty_returns_none() {
        let assembler = BatchAssembler::new();
        assert!(assembler.assemble(DeviceId::new(), None).is_none());
    }

    #[test]
    fn test_assemble_drains_in_recording_order() {
        let assembler = BatchAssembler::new();
        let device = DeviceId::new();
        let a = VersionedRecord::wrap(Uuid::new_v4(), json!("a"), device);
        let b = VersionedRecord::wrap(Uuid::new_v4(), json!("b"), device);

        assembler.record(DataType::Account, a.clone());
        assembler.record(DataType::Payee, b.clone());
        assert_eq!(assembler.pending_count(), 2);

        let batch = assembler.assemble(device, None).unwrap();
        assert_eq!(batch.origin_device, device);
        assert_eq!(batch.changes[0].record, a);
        assert_eq!(batch.changes[1].record, b);
        assert_eq!(assembler.pending_count(), 0);
    }

    #[test]
    fn test_newer_change_replaces_pending_one() {
        let assembler = BatchAssembler::new();
        let device = DeviceId::new();
        let v1 = VersionedRecord::wrap(Uuid::new_v4(), json!(1), device);
        let v2 = v1.clone().bump(json!(2), device);

        assembler.record(DataType::Budget, v1.clone());
        assembler.record(DataType::Budget, v2.clone());
        assembler.record(DataType::Budget, v1);

        let batch = assembler.assemble(device, None).unwrap();
        assert_eq!(batch.changes.len(), 1);
        assert_eq!(batch.changes[0].record, v2);
    }

    #[test]
    fn test_same_id_different_type_is_kept_apart() {
        let assembler = BatchAssembler::new();
        let device = DeviceId::new();
        let id = Uuid::new_v4();

        assembler.record(DataType::Account, VersionedRecord::wrap(id, json!(1), device));
        assembler.record(DataType::Payee, VersionedRecord::wrap(id, json!(2), device));
        assert_eq!(assembler.pending_count(), 2);
    }

    #[test]
    fn test_created_at_is_strictly_increasing() {
        let assembler = BatchAssembler::new();
        let device = DeviceId::new();
        let mut last = None;

        for n in 0..50 {
            assembler.record(
                DataType::Account,
                VersionedRecord::wrap(Uuid::new_v4(), json!(n), device),
            );
            let batch = assembler.assemble(device, None).unwrap();
            if let Some(previous) = last {
                assert!(batch.created_at > previous);
            }
            last = Some(batch.created_at);
        }
    }

    #[test]
    fn test_created_after_queued_batch() {
        let assembler = BatchAssembler::new();
        let device = DeviceId::new();
        let future = truncate_micros(Utc::now() + Duration::hours(1));

        assembler.record(DataType::Account, VersionedRecord::wrap(Uuid::new_v4(), json!(0), device));
        let batch = assembler.assemble(device, Some(future)).unwrap();
        assert_eq!(batch.created_at, future + Duration::microseconds(1));
    }
}
