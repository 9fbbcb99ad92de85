//! Wires the sync engine to this install's data directory.
//!
//! ```text
//! <data_dir>/
//!   device_id
//!   install.key
//!   credentials.json
//!   state/      sync_state.json, sync_config.json
//!   records/    accounts.json, transactions.json, ...
//!   queue/      <batch-id>.batch
//! ```

use budget_sync_core::{
    BatchQueue, CodecError, DeviceId, DeviceIdError, EncryptionCodec, FileCredentialStore,
    FileRecordStore, FixedNetwork, FolderProvider, InstallKey, ProviderKind, StateStoreError,
    StorageProvider, SyncOrchestrator, SyncServices, SyncStateStore,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::http_provider::HttpRelayProvider;

const MAX_RETRY_DELAY: Duration = Duration::from_secs(30);

/// Locations of the engine's files inside the data directory.
#[derive(Debug, Clone)]
pub struct DataPaths {
    root: PathBuf,
}

impl DataPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn device_id(&self) -> PathBuf {
        self.root.join("device_id")
    }

    pub fn install_key(&self) -> PathBuf {
        self.root.join("install.key")
    }

    pub fn credentials(&self) -> PathBuf {
        self.root.join("credentials.json")
    }

    pub fn state(&self) -> PathBuf {
        self.root.join("state")
    }

    pub fn records(&self) -> PathBuf {
        self.root.join("records")
    }

    pub fn queue(&self) -> PathBuf {
        self.root.join("queue")
    }
}

/// Errors that can occur while opening the engine.
#[derive(Debug)]
pub enum EngineError {
    Device(DeviceIdError),
    Key(CodecError),
    State(StateStoreError),
    /// The relay provider is selected but no relay URL is configured.
    RelayNotConfigured,
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Device(e) => write!(f, "Device identity error: {}", e),
            EngineError::Key(e) => write!(f, "Install key error: {}", e),
            EngineError::State(e) => write!(f, "Sync state error: {}", e),
            EngineError::RelayNotConfigured => write!(
                f,
                "Relay not configured. Set provider.relay_url in the config file or BUDGETSYNC_RELAY_URL."
            ),
        }
    }
}

impl std::error::Error for EngineError {}

impl From<DeviceIdError> for EngineError {
    fn from(e: DeviceIdError) -> Self {
        EngineError::Device(e)
    }
}

impl From<CodecError> for EngineError {
    fn from(e: CodecError) -> Self {
        EngineError::Key(e)
    }
}

impl From<StateStoreError> for EngineError {
    fn from(e: StateStoreError) -> Self {
        EngineError::State(e)
    }
}

/// Opens only the sync state store, without touching providers or keys.
pub fn open_state(config: &Config) -> Result<SyncStateStore, EngineError> {
    let paths = DataPaths::new(&config.data_dir.value);
    Ok(SyncStateStore::open(paths.state())?)
}

/// Credential store for this install.
pub fn credentials(config: &Config) -> FileCredentialStore {
    FileCredentialStore::new(DataPaths::new(&config.data_dir.value).credentials())
}

/// Install key shared by the user's devices, generated on first use.
pub fn install_key(config: &Config) -> Result<InstallKey, EngineError> {
    let paths = DataPaths::new(&config.data_dir.value);
    Ok(InstallKey::load_or_generate(&paths.install_key())?)
}

/// Builds the adapter for the selected provider.
///
/// Providers that cannot be built fall back to the folder provider; the
/// engine then fails each cycle with a configuration error naming the
/// mismatch.
pub fn provider_for(kind: ProviderKind, config: &Config) -> Arc<dyn StorageProvider> {
    match (kind, config.provider.relay_url.as_deref()) {
        (ProviderKind::LocalFolder, _) => Arc::new(FolderProvider::new(config.folder())),
        (ProviderKind::HttpRelay, Some(url)) => Arc::new(HttpRelayProvider::new(url)),
        (other, _) => {
            tracing::warn!(provider = %other, "Storage provider unavailable; sync cycles will fail");
            Arc::new(FolderProvider::new(config.folder()))
        }
    }
}

/// Checks that the selected provider can be reached before a sync is run.
pub fn require_provider(config: &Config) -> Result<(), EngineError> {
    let kind = open_state(config)?.config().storage_provider;
    if kind == ProviderKind::HttpRelay && config.provider.relay_url.is_none() {
        return Err(EngineError::RelayNotConfigured);
    }
    Ok(())
}

/// Opens the orchestrator for the configured data directory.
///
/// `interactive` declares whether a user can answer manual conflicts.
pub fn open(config: &Config, interactive: bool) -> Result<SyncOrchestrator, EngineError> {
    let paths = DataPaths::new(&config.data_dir.value);
    let device = DeviceId::load_or_create(&paths.device_id())?;
    let state = SyncStateStore::open(paths.state())?;
    let sync_config = state.config();

    // Encryption is fixed for the lifetime of the orchestrator
    let codec = if sync_config.enable_encryption {
        EncryptionCodec::new(Some(InstallKey::load_or_generate(&paths.install_key())?))
    } else {
        EncryptionCodec::disabled()
    };

    let provider = provider_for(sync_config.storage_provider, config);
    tracing::debug!(
        device = %device,
        provider = %sync_config.storage_provider,
        encryption = codec.is_enabled(),
        "Opening sync engine"
    );

    let orchestrator = SyncOrchestrator::new(SyncServices {
        device,
        state,
        records: Arc::new(FileRecordStore::new(paths.records())),
        queue: BatchQueue::new(paths.queue(), codec),
        provider,
        credentials: Arc::new(FileCredentialStore::new(paths.credentials())),
        network: Arc::new(FixedNetwork(config.network.value)),
    })
    .with_interactive(interactive)
    .with_retry_delays(
        Duration::from_millis(config.retry_base_delay_ms.value),
        MAX_RETRY_DELAY,
    );

    Ok(orchestrator)
}
