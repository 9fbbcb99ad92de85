//! Seams between the engine and the outside world: remote storage and the
//! network the device is currently on.

mod folder;

pub use folder::FolderProvider;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::BatchId;
use crate::credentials::ProviderAuth;
use crate::state::ProviderKind;

/// A sealed batch as it crosses the provider boundary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SealedBatch {
    pub id: BatchId,
    pub payload: Vec<u8>,
    /// When the provider stored the batch, in the provider's clock.
    /// Set on download, `None` on upload.
    pub received_at: Option<DateTime<Utc>>,
}

impl SealedBatch {
    pub fn new(id: BatchId, payload: Vec<u8>) -> Self {
        Self {
            id,
            payload,
            received_at: None,
        }
    }
}

/// Provider confirmation that a batch is durably stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadAck {
    pub batch_id: BatchId,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Credentials were rejected; retrying will not help.
    #[error("Provider rejected credentials")]
    Unauthorized,

    #[error("Network error: {0}")]
    Network(String),

    #[error("Provider storage error: {0}")]
    Storage(String),
}

impl ProviderError {
    /// Whether another attempt could succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ProviderError::Unauthorized)
    }
}

/// Remote store that relays sealed batches between a user's devices.
///
/// Providers never see plaintext. Uploading the same batch ID twice must be
/// accepted, and `download_since` must return every batch the provider
/// received strictly after `since` (all batches when `None`), in receipt
/// order, each stamped with its `received_at`.
#[async_trait]
pub trait StorageProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    async fn upload_batch(
        &self,
        auth: &ProviderAuth,
        batch: &SealedBatch,
    ) -> Result<UploadAck, ProviderError>;

    async fn download_since(
        &self,
        auth: &ProviderAuth,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<SealedBatch>, ProviderError>;

    /// Whether receipt times only ever grow, so a batch can never appear
    /// behind a cursor that already passed it. Providers whose receipt
    /// times come from the uploading device's clock return `false` and are
    /// always listed in full.
    fn has_ordered_receipts(&self) -> bool {
        true
    }
}

/// Connectivity class of the current network.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkClass {
    Wifi,
    Ethernet,
    Cellular,
    Offline,
}

impl NetworkClass {
    /// Unmetered connections that satisfy a Wi-Fi only setting.
    pub fn is_unmetered(&self) -> bool {
        matches!(self, NetworkClass::Wifi | NetworkClass::Ethernet)
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "wifi" | "wi-fi" => Some(NetworkClass::Wifi),
            "ethernet" => Some(NetworkClass::Ethernet),
            "cellular" => Some(NetworkClass::Cellular),
            "offline" => Some(NetworkClass::Offline),
            _ => None,
        }
    }
}

impl std::fmt::Display for NetworkClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            NetworkClass::Wifi => "wifi",
            NetworkClass::Ethernet => "ethernet",
            NetworkClass::Cellular => "cellular",
            NetworkClass::Offline => "offline",
        };
        f.write_str(s)
    }
}

/// Reports the network the device is on.
pub trait NetworkMonitor: Send + Sync {
    fn current(&self) -> NetworkClass;
}

/// A monitor that always reports the same class, for hosts that cannot
/// detect connectivity themselves.
#[derive(Debug, Clone, Copy)]
pub struct FixedNetwork(pub NetworkClass);

impl NetworkMonitor for FixedNetwork {
    fn current(&self) -> NetworkClass {
        self.0
    }
}
