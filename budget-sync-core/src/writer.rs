//! Typed write API for domain consumers.
//!
//! Screens and importers never build versioned records or batches
//! themselves. They create, edit and delete payloads through a
//! [`RecordWriter`], which applies the versioning rules, stores the record
//! locally and hands the change to the orchestrator.
//!
//! Edits are applied to the stored record inside [`RecordStore::update`],
//! so a record adopted by a running sync cycle is never overwritten by an
//! edit based on an older version.
//!
//! [`RecordStore::update`]: crate::store::RecordStore::update

use std::marker::PhantomData;

use uuid::Uuid;

use crate::error::SyncError;
use crate::models::{DataType, SyncRecord, Syncable, VersionedRecord};
use crate::orchestrator::SyncOrchestrator;

/// Writer for one kind of domain record.
pub struct RecordWriter<'a, T> {
    orchestrator: &'a SyncOrchestrator,
    _payload: PhantomData<T>,
}

impl<'a, T: Syncable> RecordWriter<'a, T> {
    pub(crate) fn new(orchestrator: &'a SyncOrchestrator) -> Self {
        Self {
            orchestrator,
            _payload: PhantomData,
        }
    }

    /// Creates a new record at version 1.
    pub fn create(&self, payload: T) -> Result<VersionedRecord<T>, SyncError> {
        let record = VersionedRecord::wrap(Uuid::new_v4(), payload, self.orchestrator.device());
        self.save(&record)?;
        Ok(record)
    }

    /// Replaces the payload of a live record.
    pub fn update(&self, id: Uuid, payload: T) -> Result<VersionedRecord<T>, SyncError> {
        let device = self.orchestrator.device();
        self.edit(id, |record| record.bump(payload, device))
    }

    /// Soft-deletes a live record.
    pub fn delete(&self, id: Uuid) -> Result<VersionedRecord<T>, SyncError> {
        let device = self.orchestrator.device();
        self.edit(id, |record| record.tombstone(device))
    }

    /// Returns the record, including a tombstoned one.
    pub fn get(&self, id: Uuid) -> Result<Option<VersionedRecord<T>>, SyncError> {
        match self.orchestrator.records().get(T::DATA_TYPE, id)? {
            Some(record) => Ok(Some(record.into_typed()?)),
            None => Ok(None),
        }
    }

    /// Every live record, oldest change first.
    pub fn list(&self) -> Result<Vec<VersionedRecord<T>>, SyncError> {
        let mut records = self
            .orchestrator
            .records()
            .list(T::DATA_TYPE)?
            .into_iter()
            .filter(|r| !r.tombstone)
            .map(|r| r.into_typed())
            .collect::<Result<Vec<VersionedRecord<T>>, _>>()?;
        records.sort_by_key(|r| r.last_modified);
        Ok(records)
    }

    /// Applies `change` to the stored live record while the store is locked.
    fn edit(
        &self,
        id: Uuid,
        change: impl FnOnce(VersionedRecord<T>) -> VersionedRecord<T>,
    ) -> Result<VersionedRecord<T>, SyncError> {
        let data_type = T::DATA_TYPE;
        let mut change = Some(change);
        let mut outcome = Err(SyncError::RecordNotFound { data_type, id });

        self.orchestrator
            .records()
            .update(data_type, id, &mut |current| {
                let change = change.take()?;
                let edited = live::<T>(data_type, id, current)
                    .and_then(|record| change(record).into_value().map_err(SyncError::from));
                let stored = edited.as_ref().ok().cloned();
                outcome = edited;
                stored
            })?;

        let stored = outcome?;
        let typed = stored.clone().into_typed()?;
        self.orchestrator.record_write(data_type, stored)?;
        Ok(typed)
    }

    fn save(&self, record: &VersionedRecord<T>) -> Result<(), SyncError> {
        let stored = record.clone().into_value()?;
        self.orchestrator.records().put(T::DATA_TYPE, stored.clone())?;
        self.orchestrator.record_write(T::DATA_TYPE, stored)?;
        Ok(())
    }
}

fn live<T: Syncable>(
    data_type: DataType,
    id: Uuid,
    current: Option<SyncRecord>,
) -> Result<VersionedRecord<T>, SyncError> {
    let record = current.ok_or(SyncError::RecordNotFound { data_type, id })?;
    if record.tombstone {
        return Err(SyncError::RecordDeleted { data_type, id });
    }
    Ok(record.into_typed()?)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use crate::batch::BatchQueue;
    use crate::device::DeviceId;
    use crate::error::SyncError;
    use crate::models::{Account, AccountKind, DataType, Payee, SyncRecord};
    use crate::store::{FileRecordStore, RecordStore, StorageError};
    use crate::test_support::Harness;
    use chrono::Utc;
    use uuid::Uuid;

    /// Store that lets a sync cycle adopt a record right before the next
    /// update runs.
    struct AdoptingStore {
        inner: FileRecordStore,
        adopt_before_update: Mutex<Option<SyncRecord>>,
    }

    impl RecordStore for AdoptingStore {
        fn get(&self, data_type: DataType, id: Uuid) -> Result<Option<SyncRecord>, StorageError> {
            self.inner.get(data_type, id)
        }

        fn update(
            &self,
            data_type: DataType,
            id: Uuid,
            change: &mut dyn FnMut(Option<SyncRecord>) -> Option<SyncRecord>,
        ) -> Result<(), StorageError> {
            if let Some(adopted) = self.adopt_before_update.lock().unwrap().take() {
                self.inner.put(data_type, adopted)?;
            }
            self.inner.update(data_type, id, change)
        }

        fn list(&self, data_type: DataType) -> Result<Vec<SyncRecord>, StorageError> {
            self.inner.list(data_type)
        }
    }

    #[test]
    fn test_create_update_delete() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let accounts = orchestrator.writer::<Account>();

        let created = accounts.create(Account::new("Visa", "USD")).unwrap();
        assert_eq!(created.version, 1);
        assert_eq!(created.origin_device, orchestrator.device());

        let updated = accounts
            .update(created.id, Account::new("Visa", "USD").with_kind(AccountKind::Credit))
            .unwrap();
        assert_eq!(updated.version, 2);
        assert_eq!(
            accounts.get(created.id).unwrap().unwrap().payload.kind,
            AccountKind::Credit
        );

        let deleted = accounts.delete(created.id).unwrap();
        assert!(deleted.tombstone);
        assert_eq!(deleted.version, 3);
        assert!(accounts.list().unwrap().is_empty());
        assert!(accounts.get(created.id).unwrap().unwrap().tombstone);
    }

    #[test]
    fn test_deleted_record_cannot_change() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let accounts = orchestrator.writer::<Account>();
        let account = accounts.create(Account::new("Old", "USD")).unwrap();
        accounts.delete(account.id).unwrap();

        assert!(matches!(
            accounts.update(account.id, Account::new("New", "USD")),
            Err(SyncError::RecordDeleted { .. })
        ));
        assert!(matches!(
            accounts.delete(account.id),
            Err(SyncError::RecordDeleted { .. })
        ));
    }

    #[test]
    fn test_unknown_record() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let result = orchestrator
            .writer::<Account>()
            .update(Uuid::new_v4(), Account::new("x", "USD"));

        assert!(matches!(
            result,
            Err(SyncError::RecordNotFound {
                data_type: DataType::Account,
                ..
            })
        ));
    }

    #[test]
    fn test_writes_are_pending_until_synced() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let accounts = orchestrator.writer::<Account>();

        let a = accounts.create(Account::new("A", "USD")).unwrap();
        accounts.update(a.id, Account::new("A2", "USD")).unwrap();
        accounts.create(Account::new("B", "USD")).unwrap();

        // Two records, the second write to A replaced the first
        assert_eq!(orchestrator.state().pending_changes, 2);
        orchestrator.flush().unwrap();
        assert_eq!(orchestrator.state().pending_changes, 2);
        assert_eq!(orchestrator.queued_batches().unwrap().len(), 1);
    }

    #[test]
    fn test_list_is_ordered_by_last_change() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let accounts = orchestrator.writer::<Account>();

        let first = accounts.create(Account::new("First", "USD")).unwrap();
        accounts.create(Account::new("Second", "USD")).unwrap();
        accounts.update(first.id, Account::new("First, renamed", "USD")).unwrap();

        let names: Vec<_> = accounts
            .list()
            .unwrap()
            .into_iter()
            .map(|r| r.payload.name)
            .collect();
        assert_eq!(names, vec!["Second", "First, renamed"]);
    }

    #[test]
    fn test_concurrent_edits_build_on_each_other() {
        let harness = Harness::new();
        let orchestrator = harness.orchestrator();
        let accounts = orchestrator.writer::<Account>();
        let account = accounts.create(Account::new("Shared", "USD")).unwrap();

        std::thread::scope(|scope| {
            for writer in 0..4 {
                let accounts = &accounts;
                scope.spawn(move || {
                    for edit in 0..10 {
                        let name = format!("writer {} edit {}", writer, edit);
                        accounts.update(account.id, Account::new(&name, "USD")).unwrap();
                    }
                });
            }
        });

        // Every edit bumped the version the previous one stored
        let stored = accounts.get(account.id).unwrap().unwrap();
        assert_eq!(stored.version, 41);
        assert_eq!(orchestrator.state().pending_changes, 1);

        orchestrator.flush().unwrap();
        let batch = orchestrator.queued_batches().unwrap()[0];
        let queue = BatchQueue::new(harness.dir.path().join("local").join("queue"), harness.codec());
        let queued = queue.load(&batch).unwrap();
        assert_eq!(queued.changes[0].record.version, 41);
        assert_eq!(queued.changes[0].record.payload, serde_json::to_value(&stored.payload).unwrap());
    }

    #[test]
    fn test_edit_builds_on_version_adopted_meanwhile() {
        let harness = Harness::new();
        let store = Arc::new(AdoptingStore {
            inner: FileRecordStore::new(harness.dir.path().join("local").join("records")),
            adopt_before_update: Mutex::new(None),
        });
        let orchestrator = harness.device_with_store("local", store.clone());
        let payees = orchestrator.writer::<Payee>();
        let payee = payees.create(Payee::new("Original")).unwrap();

        let remote = payee
            .clone()
            .bump(Payee::new("Remote edit"), DeviceId::new())
            .into_value()
            .unwrap()
            .synced_at(Utc::now());
        *store.adopt_before_update.lock().unwrap() = Some(remote);

        let edited = payees.update(payee.id, Payee::new("Local edit")).unwrap();
        assert_eq!(edited.version, 3);

        let stored = payees.get(payee.id).unwrap().unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(stored.payload.name, "Local edit");
        assert!(stored.is_pending());
    }
}
