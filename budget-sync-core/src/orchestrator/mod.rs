//! The sync state machine.
//!
//! ```text
//! Idle ─trigger─▶ Checking ─▶ Uploading ─▶ Downloading ─▶ Reconciling ─┬─▶ Completed
//!                    │            │             │                      │
//!                    ├────────────┴─────────────┴──▶ Failed            └─▶ ConflictPending
//!                    │                                                        │ resolve_conflict
//!                    └──▶ Idle (sync not allowed)                             ▼ (all resolved)
//!                                                                          Completed
//! ```
//!
//! At most one cycle runs at a time: [`SyncStateStore::try_begin_cycle`] is
//! the only way into `Checking`, so concurrent triggers observe the running
//! cycle and return its state. Domain writes never wait for a cycle; they
//! land in the assembler and are picked up by the next one.

mod retry;

pub use retry::RetryPolicy;

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::batch::{BatchAssembler, BatchId, BatchQueue, SyncBatch};
use crate::conflict::{detect, SyncConflict};
use crate::credentials::{CredentialStore, ProviderAuth};
use crate::device::DeviceId;
use crate::error::SyncError;
use crate::models::{DataType, SyncRecord, Syncable};
use crate::provider::{NetworkClass, NetworkMonitor, ProviderError, SealedBatch, StorageProvider};
use crate::resolver::{resolve, ConflictStrategy};
use crate::state::{
    ErrorKind, SyncConfig, SyncConfigPatch, SyncFailure, SyncState, SyncStateStore, SyncStatus,
};
use crate::store::{RecordStore, StorageError};
use crate::writer::RecordWriter;

const UPLOAD_DONE: u8 = 40;
const DOWNLOAD_DONE: u8 = 70;
const RECONCILE_DONE: u8 = 95;

/// What asked for a sync cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit user request; runs even when automatic sync is off.
    Manual,
    Startup,
    Interval,
}

impl std::fmt::Display for SyncTrigger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            SyncTrigger::Manual => "manual",
            SyncTrigger::Startup => "startup",
            SyncTrigger::Interval => "interval",
        };
        f.write_str(s)
    }
}

/// Collaborators handed to the orchestrator at construction.
pub struct SyncServices {
    pub device: DeviceId,
    pub state: SyncStateStore,
    pub records: Arc<dyn RecordStore>,
    pub queue: BatchQueue,
    pub provider: Arc<dyn StorageProvider>,
    pub credentials: Arc<dyn CredentialStore>,
    pub network: Arc<dyn NetworkMonitor>,
}

/// Coordinates sync cycles and owns the process-wide sync state.
pub struct SyncOrchestrator {
    device: DeviceId,
    state: SyncStateStore,
    records: Arc<dyn RecordStore>,
    queue: BatchQueue,
    assembler: BatchAssembler,
    provider: Arc<dyn StorageProvider>,
    credentials: Arc<dyn CredentialStore>,
    network: Arc<dyn NetworkMonitor>,
    retry: RetryPolicy,
    interactive: bool,
    // Bumped by `cancel`; each cycle watches for a change.
    cancel: watch::Sender<u64>,
}

/// Batches that survived download checks, plus where the next download
/// starts.
struct Downloaded {
    batches: Vec<SyncBatch>,
    cursor: Option<DateTime<Utc>>,
    listed: BTreeSet<BatchId>,
}

enum Reconciled {
    Adopted,
    Unchanged,
    Conflict(SyncConflict),
}

/// How reconciliation left the cycle.
enum Settled {
    /// Conflicts wait for the host; the cycle stops here.
    Waiting(SyncState),
    /// Ready to complete. `resolutions` changes were queued by automatic
    /// conflict resolution.
    Ready {
        report: CycleReport,
        resolutions: usize,
    },
}

/// Non-fatal problems met during a cycle.
#[derive(Default)]
struct CycleReport {
    problems: Vec<SyncFailure>,
}

impl CycleReport {
    fn add(&mut self, kind: ErrorKind, message: impl Into<String>) {
        self.problems.push(SyncFailure::new(kind, message));
    }

    fn has(&self, kind: ErrorKind) -> bool {
        self.problems.iter().any(|p| p.kind == kind)
    }

    /// One failure for the state: the first kind, every message.
    fn summary(&self) -> Option<SyncFailure> {
        let first = self.problems.first()?;
        let message = self
            .problems
            .iter()
            .map(|p| p.message.as_str())
            .collect::<Vec<_>>()
            .join("; ");
        Some(SyncFailure::new(first.kind, message))
    }
}

fn storage_failure(e: impl std::fmt::Display) -> SyncFailure {
    SyncFailure::new(ErrorKind::Storage, e.to_string())
}

fn transport_failure(e: ProviderError) -> SyncFailure {
    match e {
        ProviderError::Unauthorized => SyncFailure::new(ErrorKind::Auth, e.to_string()),
        ProviderError::Network(_) | ProviderError::Storage(_) => {
            SyncFailure::new(ErrorKind::Network, e.to_string())
        }
    }
}

fn progress_between(start: u8, end: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return end;
    }
    let span = (end - start) as usize;
    start + (span * done / total) as u8
}

/// Collapses downloaded changes to the newest version of each record,
/// keeping the order in which records first appeared.
fn latest_versions(batches: Vec<SyncBatch>) -> Vec<(DataType, SyncRecord)> {
    let mut order = Vec::new();
    let mut latest: HashMap<(DataType, Uuid), SyncRecord> = HashMap::new();

    for change in batches.into_iter().flat_map(|b| b.changes) {
        let key = (change.data_type, change.record.id);
        match latest.get(&key) {
            Some(existing) if existing.version > change.record.version => {}
            Some(_) => {
                latest.insert(key, change.record);
            }
            None => {
                order.push(key);
                latest.insert(key, change.record);
            }
        }
    }

    order
        .into_iter()
        .filter_map(|key| latest.remove(&key).map(|record| (key.0, record)))
        .collect()
}

impl SyncOrchestrator {
    pub fn new(services: SyncServices) -> Self {
        let (cancel, _) = watch::channel(0);
        Self {
            device: services.device,
            state: services.state,
            records: services.records,
            queue: services.queue,
            assembler: BatchAssembler::new(),
            provider: services.provider,
            credentials: services.credentials,
            network: services.network,
            retry: RetryPolicy::default(),
            interactive: true,
            cancel,
        }
    }

    /// Declares whether a user is around to resolve conflicts by hand.
    pub fn with_interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    /// Overrides the backoff delays. The retry count always comes from
    /// [`SyncConfig::max_sync_retries`].
    pub fn with_retry_delays(mut self, base: Duration, max: Duration) -> Self {
        self.retry.base_delay = base;
        self.retry.max_delay = max;
        self
    }

    pub fn device(&self) -> DeviceId {
        self.device
    }

    pub fn state(&self) -> SyncState {
        self.state.state()
    }

    pub fn config(&self) -> SyncConfig {
        self.state.config()
    }

    pub fn update_config(&self, patch: &SyncConfigPatch) -> Result<SyncConfig, SyncError> {
        Ok(self.state.update_config(patch)?)
    }

    pub fn records(&self) -> &dyn RecordStore {
        self.records.as_ref()
    }

    /// Batches waiting in the local queue, oldest first.
    pub fn queued_batches(&self) -> Result<Vec<BatchId>, SyncError> {
        Ok(self.queue.list_pending()?)
    }

    /// Typed write API for one kind of domain record.
    pub fn writer<T: Syncable>(&self) -> RecordWriter<'_, T> {
        RecordWriter::new(self)
    }

    /// Flushes state to disk and releases the orchestrator.
    pub fn shutdown(self) -> Result<(), SyncError> {
        Ok(self.state.shutdown()?)
    }

    /// Hands a local mutation to the engine. It travels with the next batch.
    pub fn record_write(&self, data_type: DataType, record: SyncRecord) -> Result<SyncState, SyncError> {
        debug!(%data_type, id = %record.id, version = record.version, "Local change recorded");
        self.assembler.record(data_type, record);
        self.refresh_pending()
    }

    /// Seals the changes recorded so far into one queued batch.
    pub fn flush(&self) -> Result<Option<BatchId>, SyncError> {
        let after = self.queue.latest()?.map(|id| id.created_at);
        let Some(batch) = self.assembler.assemble(self.device, after) else {
            return Ok(None);
        };

        match self.queue.persist(&batch) {
            Ok(id) => {
                debug!(batch = %id, changes = batch.changes.len(), "Batch queued");
                self.refresh_pending()?;
                Ok(Some(id))
            }
            Err(e) => {
                // Put the changes back so the next flush retries them
                for change in batch.changes {
                    self.assembler.record(change.data_type, change.record);
                }
                Err(e.into())
            }
        }
    }

    /// Aborts in-flight provider calls and backoff of the running cycle.
    /// The cycle ends `Failed` without purging anything.
    pub fn cancel(&self) {
        self.cancel.send_modify(|generation| *generation += 1);
    }

    /// Runs one sync cycle.
    ///
    /// Returns the current state unchanged when a cycle is already running
    /// or conflicts await resolution. Failures inside the cycle end up in
    /// the returned state; `Err` means the state itself could not be saved.
    /// The returned future must be driven to completion; use [`cancel`]
    /// to stop a cycle early.
    ///
    /// [`cancel`]: SyncOrchestrator::cancel
    pub async fn trigger(&self, trigger: SyncTrigger) -> Result<SyncState, SyncError> {
        if self.state.try_begin_cycle()?.is_none() {
            let state = self.state.state();
            debug!(%trigger, status = %state.status, "Sync trigger ignored");
            return Ok(state);
        }
        info!(%trigger, "Sync cycle started");

        let mut cancelled = self.cancel.subscribe();
        let outcome = tokio::select! {
            result = self.run_cycle(trigger) => result,
            _ = cancelled.changed() => Err(SyncFailure::new(ErrorKind::Cancelled, "cancelled")),
        };

        match outcome {
            Ok(state) => Ok(state),
            Err(failure) => self.fail(failure),
        }
    }

    /// Commits `strategy` for one surfaced conflict. Once the last conflict
    /// is resolved the pending cycle completes.
    pub fn resolve_conflict(
        &self,
        data_type: DataType,
        id: Uuid,
        strategy: ConflictStrategy,
    ) -> Result<SyncState, SyncError> {
        if strategy == ConflictStrategy::Manual {
            return Err(SyncError::ManualResolution);
        }

        let state = self.state.state();
        if state.status != SyncStatus::ConflictPending {
            return Err(SyncError::NoPendingConflicts);
        }
        let conflict = state
            .conflicts
            .iter()
            .find(|c| c.data_type == data_type && c.record_id() == id)
            .cloned()
            .ok_or(SyncError::ConflictNotFound { data_type, id })?;

        self.commit_resolution(&conflict, strategy)?;
        info!(%data_type, %id, %strategy, "Conflict resolved");
        self.flush()?;

        let state = self.state.update_state(|s| {
            s.conflicts
                .retain(|c| !(c.data_type == data_type && c.record_id() == id));
        })?;
        if !state.conflicts.is_empty() {
            return self.refresh_pending();
        }

        // A missing-host warning no longer applies once the host resolved everything
        let carried = state.error.filter(|e| e.kind != ErrorKind::Config);
        match self.finalize(carried) {
            Ok(state) => Ok(state),
            Err(failure) => self.fail(failure),
        }
    }

    async fn run_cycle(&self, trigger: SyncTrigger) -> Result<SyncState, SyncFailure> {
        let config = self.state.config();

        if let Err(reason) = self.is_sync_allowed(trigger, &config) {
            info!(%trigger, %reason, "Sync skipped");
            return self
                .state
                .update_state(|s| {
                    s.status = SyncStatus::Idle;
                    s.current_operation = Some(reason);
                    s.cycle_started_at = None;
                })
                .map_err(storage_failure);
        }

        let auth = self.authenticate(&config)?;
        let retry = RetryPolicy {
            max_retries: config.max_sync_retries,
            ..self.retry
        };
        let mut report = CycleReport::default();

        self.enter(SyncStatus::Uploading, "Uploading local changes", 0)?;
        self.upload(&auth, &retry, &mut report, (0, UPLOAD_DONE)).await?;
        let downloaded = self.download(&auth, &retry, &mut report).await?;

        match self.reconcile(downloaded, &config, report)? {
            Settled::Waiting(state) => Ok(state),
            Settled::Ready {
                mut report,
                resolutions,
            } => {
                if resolutions > 0 {
                    // Resolved records reach the other devices with this cycle
                    if let Err(failure) = self
                        .upload(&auth, &retry, &mut report, (RECONCILE_DONE, 99))
                        .await
                    {
                        warn!(message = %failure.message, "Resolutions stay queued for the next cycle");
                        report.problems.push(failure);
                    }
                }
                self.finalize(report.summary())
            }
        }
    }

    fn is_sync_allowed(&self, trigger: SyncTrigger, config: &SyncConfig) -> Result<(), String> {
        let network = self.network.current();
        if network == NetworkClass::Offline {
            return Err("Skipped: device is offline".to_string());
        }
        if config.sync_only_on_wifi && !network.is_unmetered() {
            return Err(format!("Skipped: on {} and sync is Wi-Fi only", network));
        }
        match trigger {
            SyncTrigger::Interval if !config.auto_sync => {
                Err("Skipped: automatic sync is off".to_string())
            }
            SyncTrigger::Startup if !config.sync_on_startup => {
                Err("Skipped: sync on startup is off".to_string())
            }
            _ => Ok(()),
        }
    }

    fn authenticate(&self, config: &SyncConfig) -> Result<ProviderAuth, SyncFailure> {
        if self.provider.kind() != config.storage_provider {
            return Err(SyncFailure::new(
                ErrorKind::Config,
                format!(
                    "storage provider {} is configured but this host uses {}",
                    config.storage_provider,
                    self.provider.kind()
                ),
            ));
        }

        self.credentials
            .get_auth(config.storage_provider)
            .map_err(storage_failure)?
            .ok_or_else(|| SyncFailure::new(ErrorKind::Auth, "not authenticated"))
    }

    fn enter(&self, status: SyncStatus, operation: &str, progress: u8) -> Result<(), SyncFailure> {
        info!(%status, "{}", operation);
        self.state
            .update_state(|s| {
                s.status = status;
                s.current_operation = Some(operation.to_string());
                s.progress_percent = progress;
            })
            .map(|_| ())
            .map_err(storage_failure)
    }

    fn report_progress(&self, operation: String, progress: u8) -> Result<(), SyncFailure> {
        debug!(progress, "{}", operation);
        self.state
            .update_state(|s| {
                s.current_operation = Some(operation);
                s.progress_percent = progress;
            })
            .map(|_| ())
            .map_err(storage_failure)
    }

    /// Seals recorded changes and uploads every queued batch not yet
    /// uploaded in this cycle.
    async fn upload(
        &self,
        auth: &ProviderAuth,
        retry: &RetryPolicy,
        report: &mut CycleReport,
        (from, to): (u8, u8),
    ) -> Result<(), SyncFailure> {
        self.flush().map_err(storage_failure)?;

        let mut uploaded = self.state.state().awaiting_purge;
        let ids: Vec<BatchId> = self
            .queue
            .list_pending()
            .map_err(storage_failure)?
            .into_iter()
            .filter(|id| !uploaded.contains(id))
            .collect();
        let total = ids.len();

        for (index, id) in ids.into_iter().enumerate() {
            let payload = self.queue.read_sealed(&id).map_err(storage_failure)?;
            if let Err(e) = SyncBatch::open(self.queue.codec(), &payload) {
                warn!(batch = %id, error = %e, "Queued batch failed verification, not uploading");
                report.add(ErrorKind::Integrity, format!("queued batch {}: {}", id, e));
                continue;
            }

            let sealed = SealedBatch::new(id, payload);
            let provider = self.provider.as_ref();
            let sealed = &sealed;
            retry
                .run("upload", || async move {
                    let ack = provider.upload_batch(auth, sealed).await?;
                    if ack.batch_id == sealed.id {
                        Ok(())
                    } else {
                        Err(ProviderError::Network(format!(
                            "provider acknowledged {} for {}",
                            ack.batch_id, sealed.id
                        )))
                    }
                })
                .await
                .map_err(transport_failure)?;

            debug!(batch = %id, "Batch uploaded");
            uploaded.push(id);
            let awaiting = uploaded.clone();
            self.state
                .update_state(|s| s.awaiting_purge = awaiting)
                .map_err(storage_failure)?;
            self.report_progress(
                format!("Uploaded {} of {} batches", index + 1, total),
                progress_between(from, to, index + 1, total),
            )?;
        }

        info!(uploaded = total, "Upload finished");
        Ok(())
    }

    async fn download(
        &self,
        auth: &ProviderAuth,
        retry: &RetryPolicy,
        report: &mut CycleReport,
    ) -> Result<Downloaded, SyncFailure> {
        self.enter(SyncStatus::Downloading, "Downloading remote changes", UPLOAD_DONE)?;

        let state = self.state.state();
        let provider = self.provider.as_ref();
        // Receipt times stamped by uploading devices can arrive out of order,
        // so such providers are listed in full and filtered by batch ID
        let since = if provider.has_ordered_receipts() {
            state.download_cursor
        } else {
            None
        };
        let sealed = retry
            .run("download", || provider.download_since(auth, since))
            .await
            .map_err(transport_failure)?;

        let total = sealed.len();
        let mut cursor = state.download_cursor;
        let mut listed = BTreeSet::new();
        let mut batches = Vec::new();

        for (index, item) in sealed.into_iter().enumerate() {
            if let Some(at) = item.received_at {
                cursor = cursor.max(Some(at));
            }
            listed.insert(item.id);

            if item.id.origin_device == self.device {
                debug!(batch = %item.id, "Skipping own batch");
                continue;
            }
            if state.downloaded_batches.contains(&item.id) {
                continue;
            }
            match SyncBatch::open(self.queue.codec(), &item.payload) {
                Ok(batch) if batch.id() == item.id => batches.push(batch),
                Ok(batch) => {
                    warn!(batch = %item.id, inner = %batch.id(), "Downloaded batch has mismatched identity");
                    report.add(
                        ErrorKind::Integrity,
                        format!("batch {} contains batch {}", item.id, batch.id()),
                    );
                }
                Err(e) => {
                    warn!(batch = %item.id, error = %e, "Skipping downloaded batch");
                    report.add(ErrorKind::Integrity, format!("batch {}: {}", item.id, e));
                }
            }

            self.report_progress(
                format!("Downloaded {} of {} batches", index + 1, total),
                progress_between(UPLOAD_DONE, DOWNLOAD_DONE, index + 1, total),
            )?;
        }

        info!(downloaded = batches.len(), "Download finished");
        Ok(Downloaded {
            batches,
            cursor,
            listed,
        })
    }

    /// Compares and adopts under the store lock, so a local edit racing
    /// the cycle is either seen here or builds on the adopted version.
    fn reconcile_record(
        &self,
        data_type: DataType,
        remote: SyncRecord,
        now: DateTime<Utc>,
    ) -> Result<Reconciled, StorageError> {
        let id = remote.id;
        let mut remote = Some(remote);
        let mut outcome = Reconciled::Unchanged;

        self.records.update(data_type, id, &mut |local| {
            let remote = remote.take()?;
            let Some(local) = local else {
                outcome = Reconciled::Adopted;
                return Some(remote.synced_at(now));
            };

            if let Some(conflict) = detect(data_type, &local, &remote) {
                debug!(
                    %data_type,
                    %id,
                    fields = ?conflict.conflict_fields,
                    "Conflict detected"
                );
                outcome = Reconciled::Conflict(conflict);
                return None;
            }

            if remote.version > local.version {
                outcome = Reconciled::Adopted;
                Some(remote.synced_at(now))
            } else {
                None
            }
        })?;

        Ok(outcome)
    }

    fn reconcile(
        &self,
        downloaded: Downloaded,
        config: &SyncConfig,
        mut report: CycleReport,
    ) -> Result<Settled, SyncFailure> {
        self.enter(SyncStatus::Reconciling, "Reconciling remote changes", DOWNLOAD_DONE)?;

        let incoming = latest_versions(downloaded.batches);
        let total = incoming.len();
        let now = Utc::now();
        let mut conflicts = Vec::new();
        let mut adopted = 0usize;

        for (index, (data_type, remote)) in incoming.into_iter().enumerate() {
            let id = remote.id;
            match self.reconcile_record(data_type, remote, now) {
                Ok(Reconciled::Adopted) => adopted += 1,
                Ok(Reconciled::Unchanged) => {}
                Ok(Reconciled::Conflict(conflict)) => conflicts.push(conflict),
                Err(e) => {
                    warn!(%data_type, %id, error = %e, "Could not apply remote record");
                    report.add(ErrorKind::Storage, format!("{} {}: {}", data_type, id, e));
                }
            }
            if (index + 1) % 50 == 0 || index + 1 == total {
                self.report_progress(
                    format!("Reconciled {} of {} records", index + 1, total),
                    progress_between(DOWNLOAD_DONE, RECONCILE_DONE, index + 1, total),
                )?;
            }
        }
        info!(adopted, conflicts = conflicts.len(), "Reconciliation finished");

        // A record that could not be written is fetched again next cycle
        if !report.has(ErrorKind::Storage) {
            let cursor = downloaded.cursor;
            let listed = downloaded.listed;
            self.state
                .update_state(|s| {
                    s.download_cursor = cursor;
                    s.downloaded_batches = listed;
                })
                .map_err(storage_failure)?;
        }

        if !conflicts.is_empty() && config.conflict_strategy == ConflictStrategy::Manual {
            if !self.interactive {
                warn!("Manual conflict strategy on a host that cannot resolve conflicts");
                report.add(
                    ErrorKind::Config,
                    "manual conflict strategy needs an interactive host to resolve conflicts",
                );
            }
            let count = conflicts.len();
            let pending = self.pending_count();
            info!(conflicts = count, "Waiting for manual conflict resolution");
            return self
                .state
                .update_state(|s| {
                    s.status = SyncStatus::ConflictPending;
                    s.current_operation = Some(format!("{} conflicts awaiting resolution", count));
                    s.progress_percent = RECONCILE_DONE;
                    s.conflicts = conflicts;
                    s.pending_changes = pending;
                    s.error = report.summary();
                })
                .map(Settled::Waiting)
                .map_err(storage_failure);
        }

        for conflict in &conflicts {
            if let Err(e) = self.commit_resolution(conflict, config.conflict_strategy) {
                warn!(id = %conflict.record_id(), error = %e, "Could not store resolved record");
                report.add(
                    ErrorKind::Storage,
                    format!("{} {}: {}", conflict.data_type, conflict.record_id(), e),
                );
            }
        }
        if !conflicts.is_empty() {
            info!(
                resolved = conflicts.len(),
                strategy = %config.conflict_strategy,
                "Conflicts resolved automatically"
            );
        }

        Ok(Settled::Ready {
            report,
            resolutions: conflicts.len(),
        })
    }

    /// Resolves against the freshest local copy so a local edit made while
    /// the conflict waited is never overtaken by a lower version.
    fn commit_resolution(
        &self,
        conflict: &SyncConflict,
        strategy: ConflictStrategy,
    ) -> Result<(), StorageError> {
        let data_type = conflict.data_type;
        let id = conflict.record_id();
        let mut resolved = None;

        self.records.update(data_type, id, &mut |current| {
            let mut conflict = conflict.clone();
            if let Some(current) = current {
                if current.version > conflict.local.version {
                    conflict.local = current;
                }
            }
            let record = resolve(&conflict, strategy, self.device);
            resolved = Some(record.clone());
            Some(record)
        })?;

        if let Some(record) = resolved {
            debug!(%data_type, %id, %strategy, version = record.version, "Resolution stored");
            self.assembler.record(data_type, record);
        }
        Ok(())
    }

    /// Purges acknowledged batches and marks the cycle complete.
    fn finalize(&self, error: Option<SyncFailure>) -> Result<SyncState, SyncFailure> {
        let uploaded = self.state.state().awaiting_purge;
        let now = Utc::now();

        for id in &uploaded {
            match self.queue.load(id) {
                Ok(batch) => self.mark_synced(&batch, now),
                Err(e) => warn!(batch = %id, error = %e, "Could not read uploaded batch"),
            }
            self.queue.purge(id).map_err(storage_failure)?;
        }

        let pending = self.pending_count_excluding(&[]);
        let state = self
            .state
            .update_state(|s| {
                s.status = SyncStatus::Completed;
                s.last_successful_sync = Some(now);
                s.current_operation = None;
                s.progress_percent = 100;
                s.conflicts.clear();
                s.awaiting_purge.clear();
                s.pending_changes = pending;
                s.error = error;
                s.cycle_started_at = None;
            })
            .map_err(storage_failure)?;

        info!(purged = uploaded.len(), pending, "Sync cycle completed");
        Ok(state)
    }

    /// Stamps uploaded records as synced unless they changed again since.
    fn mark_synced(&self, batch: &SyncBatch, now: DateTime<Utc>) {
        for change in &batch.changes {
            let result = self
                .records
                .update(change.data_type, change.record.id, &mut |local| {
                    local.filter(|local| {
                        local.version == change.record.version && local.is_pending()
                    })
                    .map(|local| local.synced_at(now))
                });
            if let Err(e) = result {
                warn!(id = %change.record.id, error = %e, "Could not mark record synced");
            }
        }
    }

    fn fail(&self, failure: SyncFailure) -> Result<SyncState, SyncError> {
        warn!(kind = ?failure.kind, message = %failure.message, "Sync cycle failed");
        let pending = self.pending_count_excluding(&[]);
        Ok(self.state.update_state(|s| {
            s.status = SyncStatus::Failed;
            s.current_operation = None;
            s.error = Some(failure);
            s.conflicts.clear();
            s.awaiting_purge.clear();
            s.pending_changes = pending;
            s.cycle_started_at = None;
        })?)
    }

    fn refresh_pending(&self) -> Result<SyncState, SyncError> {
        let pending = self.pending_count();
        Ok(self.state.update_state(|s| s.pending_changes = pending)?)
    }

    /// Record changes not yet delivered: recorded but unassembled, plus
    /// everything queued that has not been uploaded in the current cycle.
    fn pending_count(&self) -> usize {
        let uploaded = self.state.state().awaiting_purge;
        self.pending_count_excluding(&uploaded)
    }

    fn pending_count_excluding(&self, uploaded: &[BatchId]) -> usize {
        let queued = match self.queue.list_pending() {
            Ok(ids) => ids
                .iter()
                .filter(|id| !uploaded.contains(id))
                .map(|id| self.queue.load(id).map(|b| b.changes.len()).unwrap_or(1))
                .sum(),
            Err(e) => {
                warn!(error = %e, "Could not list queued batches");
                0
            }
        };
        queued + self.assembler.pending_count()
    }
}
