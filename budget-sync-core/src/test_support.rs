//! In-memory doubles for engine tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tempfile::TempDir;

use crate::batch::{BatchId, BatchQueue};
use crate::codec::{EncryptionCodec, InstallKey};
use crate::credentials::{CredentialError, CredentialStore, ProviderAuth};
use crate::device::DeviceId;
use crate::orchestrator::{SyncOrchestrator, SyncServices};
use crate::provider::{NetworkClass, NetworkMonitor, ProviderError, SealedBatch, StorageProvider, UploadAck};
use crate::state::{ProviderKind, SyncStateStore};
use crate::store::{FileRecordStore, RecordStore};

#[derive(Default)]
struct Remote {
    batches: Vec<SealedBatch>,
    fail_uploads: usize,
    fail_downloads: usize,
    unauthorized: bool,
    hang: bool,
}

/// Provider double with failure injection. Batches live in memory.
pub(crate) struct MemoryProvider {
    kind: ProviderKind,
    remote: Mutex<Remote>,
    upload_calls: AtomicUsize,
    download_calls: AtomicUsize,
}

impl MemoryProvider {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            remote: Mutex::new(Remote::default()),
            upload_calls: AtomicUsize::new(0),
            download_calls: AtomicUsize::new(0),
        }
    }

    /// The next `n` uploads fail with a network error.
    pub fn fail_uploads(&self, n: usize) {
        self.remote.lock().unwrap().fail_uploads = n;
    }

    /// The next `n` downloads fail with a network error.
    pub fn fail_downloads(&self, n: usize) {
        self.remote.lock().unwrap().fail_downloads = n;
    }

    pub fn reject_credentials(&self) {
        self.remote.lock().unwrap().unauthorized = true;
    }

    /// Calls never complete until the flag is cleared.
    pub fn set_hang(&self, hang: bool) {
        self.remote.lock().unwrap().hang = hang;
    }

    pub fn upload_calls(&self) -> usize {
        self.upload_calls.load(Ordering::SeqCst)
    }

    pub fn download_calls(&self) -> usize {
        self.download_calls.load(Ordering::SeqCst)
    }

    /// IDs stored remotely, in receipt order.
    pub fn stored_ids(&self) -> Vec<BatchId> {
        self.remote.lock().unwrap().batches.iter().map(|b| b.id).collect()
    }

    /// Flips one byte of a stored payload.
    pub fn tamper(&self, id: BatchId) {
        let mut remote = self.remote.lock().unwrap();
        let batch = remote.batches.iter_mut().find(|b| b.id == id).unwrap();
        let last = batch.payload.len() - 1;
        batch.payload[last] ^= 0x01;
    }

    /// Stores a batch as if another device had uploaded it.
    pub fn inject(&self, id: BatchId, payload: Vec<u8>) {
        let mut remote = self.remote.lock().unwrap();
        let received_at = next_receipt(&remote.batches);
        remote.batches.push(SealedBatch {
            id,
            payload,
            received_at: Some(received_at),
        });
    }

    fn is_hanging(&self) -> bool {
        self.remote.lock().unwrap().hang
    }
}

fn next_receipt(batches: &[SealedBatch]) -> DateTime<Utc> {
    let now = crate::batch::truncate_micros(Utc::now());
    match batches.last().and_then(|b| b.received_at) {
        Some(last) if last >= now => last + ChronoDuration::microseconds(1),
        _ => now,
    }
}

#[async_trait]
impl StorageProvider for MemoryProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn upload_batch(
        &self,
        _auth: &ProviderAuth,
        batch: &SealedBatch,
    ) -> Result<UploadAck, ProviderError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        while self.is_hanging() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut remote = self.remote.lock().unwrap();
        if remote.unauthorized {
            return Err(ProviderError::Unauthorized);
        }
        if remote.fail_uploads > 0 {
            remote.fail_uploads -= 1;
            return Err(ProviderError::Network("connection reset".to_string()));
        }
        if !remote.batches.iter().any(|b| b.id == batch.id) {
            let received_at = next_receipt(&remote.batches);
            remote.batches.push(SealedBatch {
                received_at: Some(received_at),
                ..batch.clone()
            });
        }
        Ok(UploadAck { batch_id: batch.id })
    }

    async fn download_since(
        &self,
        _auth: &ProviderAuth,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SealedBatch>, ProviderError> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        while self.is_hanging() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let mut remote = self.remote.lock().unwrap();
        if remote.unauthorized {
            return Err(ProviderError::Unauthorized);
        }
        if remote.fail_downloads > 0 {
            remote.fail_downloads -= 1;
            return Err(ProviderError::Network("timed out".to_string()));
        }
        Ok(remote
            .batches
            .iter()
            .filter(|b| match (since, b.received_at) {
                (Some(since), Some(at)) => at > since,
                _ => true,
            })
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub(crate) struct MemoryCredentials {
    auths: Mutex<HashMap<ProviderKind, ProviderAuth>>,
}

impl CredentialStore for MemoryCredentials {
    fn get_auth(&self, provider: ProviderKind) -> Result<Option<ProviderAuth>, CredentialError> {
        let auth = self.auths.lock().unwrap().get(&provider).cloned();
        Ok(auth.filter(|a| !a.is_expired(Utc::now())))
    }

    fn save_auth(&self, auth: ProviderAuth) -> Result<(), CredentialError> {
        self.auths.lock().unwrap().insert(auth.provider, auth);
        Ok(())
    }

    fn clear_auth(&self, provider: ProviderKind) -> Result<(), CredentialError> {
        self.auths.lock().unwrap().remove(&provider);
        Ok(())
    }
}

/// Network monitor the test can switch.
pub(crate) struct TestNetwork(Mutex<NetworkClass>);

impl TestNetwork {
    pub fn set(&self, class: NetworkClass) {
        *self.0.lock().unwrap() = class;
    }
}

impl NetworkMonitor for TestNetwork {
    fn current(&self) -> NetworkClass {
        *self.0.lock().unwrap()
    }
}

/// A user with one shared provider and any number of devices.
pub(crate) struct Harness {
    pub dir: TempDir,
    pub provider: Arc<MemoryProvider>,
    pub credentials: Arc<MemoryCredentials>,
    pub network: Arc<TestNetwork>,
    pub key: InstallKey,
}

impl Harness {
    pub fn new() -> Self {
        let credentials = Arc::new(MemoryCredentials::default());
        credentials
            .save_auth(ProviderAuth::new(ProviderKind::LocalFolder, "token", "household"))
            .unwrap();

        Self {
            dir: TempDir::new().unwrap(),
            provider: Arc::new(MemoryProvider::new(ProviderKind::LocalFolder)),
            credentials,
            network: Arc::new(TestNetwork(Mutex::new(NetworkClass::Wifi))),
            key: InstallKey::generate(),
        }
    }

    /// The primary device under test.
    pub fn orchestrator(&self) -> SyncOrchestrator {
        self.device("local")
    }

    /// Opens (or reopens) the named device. Reopening keeps its identity,
    /// records, queue and state, like restarting the application.
    pub fn device(&self, name: &str) -> SyncOrchestrator {
        self.device_with(name, self.provider.clone())
    }

    /// Opens the named device against its own provider, such as a
    /// per-device copy of a shared folder.
    pub fn device_with(&self, name: &str, provider: Arc<dyn StorageProvider>) -> SyncOrchestrator {
        let records = Arc::new(FileRecordStore::new(self.dir.path().join(name).join("records")));
        self.open(name, provider, records)
    }

    /// Opens the named device on a custom record store.
    pub fn device_with_store(&self, name: &str, records: Arc<dyn RecordStore>) -> SyncOrchestrator {
        self.open(name, self.provider.clone(), records)
    }

    fn open(
        &self,
        name: &str,
        provider: Arc<dyn StorageProvider>,
        records: Arc<dyn RecordStore>,
    ) -> SyncOrchestrator {
        let root = self.dir.path().join(name);
        let device = DeviceId::load_or_create(&root.join("device_id")).unwrap();

        SyncOrchestrator::new(SyncServices {
            device,
            state: SyncStateStore::open(root.join("state")).unwrap(),
            records,
            queue: BatchQueue::new(
                root.join("queue"),
                EncryptionCodec::new(Some(self.key.clone())),
            ),
            provider,
            credentials: self.credentials.clone(),
            network: self.network.clone(),
        })
        .with_retry_delays(Duration::from_millis(1), Duration::from_millis(10))
    }

    pub fn codec(&self) -> EncryptionCodec {
        EncryptionCodec::new(Some(self.key.clone()))
    }
}
