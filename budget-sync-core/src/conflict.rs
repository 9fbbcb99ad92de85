//! Conflict detection between a local record and its downloaded counterpart.

use serde::{Deserialize, Serialize};

use crate::models::{DataType, SyncRecord};

/// Field name reported when one side deleted and the other edited.
pub const FIELD_TOMBSTONE: &str = "tombstone";
/// Field name reported when both sides edited the payload differently.
pub const FIELD_PAYLOAD: &str = "payload";

/// Two divergent versions of the same record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    pub data_type: DataType,
    pub local: SyncRecord,
    pub remote: SyncRecord,
    pub conflict_fields: Vec<String>,
}

impl SyncConflict {
    /// ID of the record both sides refer to.
    pub fn record_id(&self) -> uuid::Uuid {
        self.local.id
    }
}

/// Compares a local record with a remote one.
///
/// Rules, in order:
/// 1. Equal versions never conflict.
/// 2. One side tombstoned and the other not conflicts on `tombstone`.
/// 3. Both tombstoned converges without conflict.
/// 4. Otherwise a payload difference conflicts on `payload`.
///
/// Two devices that independently reach the same version with different
/// payloads are not flagged (rule 1).
pub fn detect(data_type: DataType, local: &SyncRecord, remote: &SyncRecord) -> Option<SyncConflict> {
    if local.version == remote.version {
        return None;
    }

    let field = if local.tombstone != remote.tombstone {
        FIELD_TOMBSTONE
    } else if local.tombstone {
        return None;
    } else if local.payload != remote.payload {
        FIELD_PAYLOAD
    } else {
        return None;
    };

    Some(SyncConflict {
        data_type,
        local: local.clone(),
        remote: remote.clone(),
        conflict_fields: vec![field.to_string()],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceId;
    use crate::models::VersionedRecord;
    use serde_json::{json, Value};
    use uuid::Uuid;

    fn record(id: Uuid, version: u64, payload: Value) -> SyncRecord {
        let mut record = VersionedRecord::wrap(id, payload, DeviceId::new());
        record.version = version;
        record
    }

    #[test]
    fn test_same_record_never_conflicts() {
        let r = record(Uuid::new_v4(), 4, json!({"name": "A"}));
        assert!(detect(DataType::Account, &r, &r).is_none());
    }

    #[test]
    fn test_same_version_different_payload_is_not_flagged() {
        let id = Uuid::new_v4();
        let local = record(id, 2, json!({"name": "A"}));
        let remote = record(id, 2, json!({"name": "B"}));
        assert!(detect(DataType::Account, &local, &remote).is_none());
    }

    #[test]
    fn test_payload_conflict() {
        let id = Uuid::new_v4();
        let local = record(id, 2, json!({"name": "A"}));
        let remote = record(id, 3, json!({"name": "B"}));

        let conflict = detect(DataType::Payee, &local, &remote).unwrap();
        assert_eq!(conflict.data_type, DataType::Payee);
        assert_eq!(conflict.conflict_fields, vec!["payload".to_string()]);
        assert_eq!(conflict.local, local);
        assert_eq!(conflict.remote, remote);
        assert_eq!(conflict.record_id(), id);
    }

    #[test]
    fn test_equal_payload_different_version_is_not_a_conflict() {
        let id = Uuid::new_v4();
        let local = record(id, 2, json!({"name": "A", "n": [1, 2]}));
        let remote = record(id, 5, json!({"n": [1, 2], "name": "A"}));
        assert!(detect(DataType::Account, &local, &remote).is_none());
    }

    #[test]
    fn test_delete_versus_edit_conflicts_on_tombstone() {
        let id = Uuid::new_v4();
        let local = record(id, 3, json!({"name": "A"}));
        let mut remote = record(id, 4, json!({"name": "A"}));
        remote.tombstone = true;

        let conflict = detect(DataType::Account, &local, &remote).unwrap();
        assert_eq!(conflict.conflict_fields, vec!["tombstone".to_string()]);
    }

    #[test]
    fn test_both_deleted_converges() {
        let id = Uuid::new_v4();
        let mut local = record(id, 3, json!({"name": "A"}));
        let mut remote = record(id, 6, json!({"name": "B"}));
        local.tombstone = true;
        remote.tombstone = true;
        assert!(detect(DataType::Account, &local, &remote).is_none());
    }
}
