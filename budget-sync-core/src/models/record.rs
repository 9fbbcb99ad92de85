//! The versioned wrapper every synchronized record travels in.
//!
//! A record is created once with `wrap` (version 1) and afterwards only
//! changes through `bump` or `tombstone`, both of which advance the version
//! by one and hand ownership of the change to the mutating device. Records
//! are never removed; deletion sets the one-way tombstone flag so that other
//! devices converge on the delete.

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::DataType;
use crate::device::DeviceId;

/// Type-erased record as stored locally and carried in batches.
pub type SyncRecord = VersionedRecord<serde_json::Value>;

/// A domain payload that can be synchronized.
pub trait Syncable: Serialize + DeserializeOwned + Clone {
    /// Record kind this payload is stored under.
    const DATA_TYPE: DataType;
}

/// Sync-aware wrapper around a domain payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionedRecord<T> {
    pub id: Uuid,
    pub payload: T,
    pub version: u64,
    pub last_modified: DateTime<Utc>,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub origin_device: DeviceId,
    #[serde(default)]
    pub tombstone: bool,
}

impl<T> VersionedRecord<T> {
    /// Wraps a payload for its first local write.
    pub fn wrap(id: Uuid, payload: T, device: DeviceId) -> Self {
        Self {
            id,
            payload,
            version: 1,
            last_modified: Utc::now(),
            last_synced_at: None,
            origin_device: device,
            tombstone: false,
        }
    }

    /// Records a local edit: new payload, next version, owned by `device`.
    pub fn bump(self, payload: T, device: DeviceId) -> Self {
        Self {
            payload,
            version: self.version + 1,
            last_modified: Utc::now(),
            last_synced_at: None,
            origin_device: device,
            ..self
        }
    }

    /// Records a local soft delete. The payload is kept for convergence.
    pub fn tombstone(self, device: DeviceId) -> Self {
        Self {
            version: self.version + 1,
            last_modified: Utc::now(),
            last_synced_at: None,
            origin_device: device,
            tombstone: true,
            ..self
        }
    }

    /// True when the record carries a local change not yet confirmed by a sync.
    pub fn is_pending(&self) -> bool {
        self.last_synced_at.is_none()
    }

    /// Marks the record as confirmed by a sync at `at`.
    pub fn synced_at(mut self, at: DateTime<Utc>) -> Self {
        self.last_synced_at = Some(at);
        self
    }
}

impl<T: Serialize> VersionedRecord<T> {
    /// Erases the payload type for storage and transport.
    pub fn into_value(self) -> Result<SyncRecord, serde_json::Error> {
        Ok(VersionedRecord {
            id: self.id,
            payload: serde_json::to_value(self.payload)?,
            version: self.version,
            last_modified: self.last_modified,
            last_synced_at: self.last_synced_at,
            origin_device: self.origin_device,
            tombstone: self.tombstone,
        })
    }
}

impl SyncRecord {
    /// Restores a typed record from its stored form.
    pub fn into_typed<T: DeserializeOwned>(self) -> Result<VersionedRecord<T>, serde_json::Error> {
        Ok(VersionedRecord {
            id: self.id,
            payload: serde_json::from_value(self.payload)?,
            version: self.version,
            last_modified: self.last_modified,
            last_synced_at: self.last_synced_at,
            origin_device: self.origin_device,
            tombstone: self.tombstone,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_wrap_starts_at_version_one() {
        let device = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), json!({"name": "Checking"}), device);

        assert_eq!(record.version, 1);
        assert!(!record.tombstone);
        assert!(record.is_pending());
        assert_eq!(record.origin_device, device);
    }

    #[test]
    fn test_bump_strictly_increases_version() {
        let device = DeviceId::new();
        let mut record = VersionedRecord::wrap(Uuid::new_v4(), 0u32, device);
        let mut last = record.version;

        for n in 1..10u32 {
            record = record.bump(n, device);
            assert!(record.version > last);
            assert_eq!(record.payload, n);
            last = record.version;
        }
        assert_eq!(record.version, 10);
    }

    #[test]
    fn test_bump_resets_sync_marker_and_takes_ownership() {
        let first = DeviceId::new();
        let second = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), "a", first).synced_at(Utc::now());
        assert!(!record.is_pending());

        let edited = record.bump("b", second);
        assert!(edited.is_pending());
        assert_eq!(edited.origin_device, second);
        assert_eq!(edited.version, 2);
    }

    #[test]
    fn test_tombstone_is_a_version_bump() {
        let device = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), "a", device).bump("b", device);
        let deleted = record.tombstone(device);

        assert!(deleted.tombstone);
        assert_eq!(deleted.version, 3);
        assert_eq!(deleted.payload, "b");
    }

    #[test]
    fn test_tombstone_survives_later_bumps() {
        let device = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), 1, device)
            .tombstone(device)
            .bump(2, device);

        assert!(record.tombstone);
        assert_eq!(record.version, 3);
    }

    #[test]
    fn test_value_roundtrip_keeps_metadata() {
        let device = DeviceId::new();
        let record = VersionedRecord::wrap(Uuid::new_v4(), vec![1, 2, 3], device).bump(vec![4], device);

        let erased = record.clone().into_value().unwrap();
        assert_eq!(erased.payload, json!([4]));

        let typed: VersionedRecord<Vec<i32>> = erased.into_typed().unwrap();
        assert_eq!(typed, record);
    }
}
