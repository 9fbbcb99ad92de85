//! Batches: the unit of transport between devices.
//!
//! Local changes accumulate in the [`BatchAssembler`] until they are
//! snapshotted into an immutable [`SyncBatch`], sealed and queued by the
//! [`BatchQueue`]. A batch stays queued until its upload is acknowledged.

mod assembler;
mod queue;

pub use assembler::BatchAssembler;
pub use queue::{BatchQueue, QueueError};

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{CodecError, EncryptionCodec};
use crate::device::DeviceId;
use crate::models::{DataType, SyncRecord};

/// One record change inside a batch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchChange {
    pub data_type: DataType,
    pub record: SyncRecord,
}

/// An immutable, ordered group of record changes from one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncBatch {
    pub origin_device: DeviceId,
    pub created_at: DateTime<Utc>,
    pub changes: Vec<BatchChange>,
}

impl SyncBatch {
    pub fn id(&self) -> BatchId {
        BatchId::new(self.origin_device, self.created_at)
    }

    /// Serializes and seals the batch for the queue or the wire.
    pub fn seal(&self, codec: &EncryptionCodec) -> Result<Vec<u8>, CodecError> {
        let json = serde_json::to_vec(self)
            .map_err(|e| CodecError::Integrity(format!("unserializable batch: {}", e)))?;
        codec.seal(&json)
    }

    /// Opens a sealed batch. Anything that fails verification or does not
    /// decode to a batch is an integrity failure.
    pub fn open(codec: &EncryptionCodec, sealed: &[u8]) -> Result<Self, CodecError> {
        let json = codec.open(sealed)?;
        serde_json::from_slice(&json)
            .map_err(|e| CodecError::Integrity(format!("undecodable batch: {}", e)))
    }
}

#[derive(Error, Debug, PartialEq, Eq)]
#[error("Invalid batch ID: {0}")]
pub struct BatchIdError(String);

/// Batch identity: origin device plus creation time (microsecond precision).
///
/// Displays as `<device>_<micros>` with the timestamp zero-padded to 20
/// digits, so IDs from one device sort chronologically as strings too.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BatchId {
    pub origin_device: DeviceId,
    pub created_at: DateTime<Utc>,
}

impl BatchId {
    pub fn new(origin_device: DeviceId, created_at: DateTime<Utc>) -> Self {
        Self {
            origin_device,
            created_at: truncate_micros(created_at),
        }
    }
}

impl Ord for BatchId {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.created_at
            .cmp(&other.created_at)
            .then_with(|| self.origin_device.cmp(&other.origin_device))
    }
}

impl PartialOrd for BatchId {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for BatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}_{:020}", self.origin_device, self.created_at.timestamp_micros())
    }
}

impl FromStr for BatchId {
    type Err = BatchIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || BatchIdError(s.to_string());

        let (device, micros) = s.rsplit_once('_').ok_or_else(invalid)?;
        let device: DeviceId = device.parse().map_err(|_| invalid())?;
        let micros: i64 = micros.parse().map_err(|_| invalid())?;
        let created_at = DateTime::from_timestamp_micros(micros).ok_or_else(invalid)?;

        Ok(Self::new(device, created_at))
    }
}

impl Serialize for BatchId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for BatchId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Drops sub-microsecond precision so timestamps survive the ID format.
pub(crate) fn truncate_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}
