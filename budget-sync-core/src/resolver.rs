//! Conflict resolution strategies.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::conflict::SyncConflict;
use crate::device::DeviceId;
use crate::models::SyncRecord;

/// Policy for resolving a detected conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConflictStrategy {
    UseLocal,
    UseRemote,
    #[default]
    Merge,
    /// Leave the conflict for the host application to resolve explicitly.
    Manual,
}

impl ConflictStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            ConflictStrategy::UseLocal => "use_local",
            ConflictStrategy::UseRemote => "use_remote",
            ConflictStrategy::Merge => "merge",
            ConflictStrategy::Manual => "manual",
        }
    }
}

impl std::fmt::Display for ConflictStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::str::FromStr for ConflictStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace('-', "_").as_str() {
            "use_local" | "local" => Ok(ConflictStrategy::UseLocal),
            "use_remote" | "remote" => Ok(ConflictStrategy::UseRemote),
            "merge" => Ok(ConflictStrategy::Merge),
            "manual" => Ok(ConflictStrategy::Manual),
            other => Err(format!("unknown conflict strategy: {}", other)),
        }
    }
}

/// Applies `strategy` to `conflict`, producing the record this device keeps.
///
/// Every strategy except `Manual` yields a new local mutation owned by
/// `device` with version `max(local, remote) + 1`; it still has to be
/// uploaded so other devices converge. `Manual` returns the local record
/// untouched. A delete on either side is never undone.
pub fn resolve(conflict: &SyncConflict, strategy: ConflictStrategy, device: DeviceId) -> SyncRecord {
    let local = &conflict.local;
    let remote = &conflict.remote;

    let payload = match strategy {
        ConflictStrategy::Manual => return local.clone(),
        ConflictStrategy::UseLocal => local.payload.clone(),
        ConflictStrategy::UseRemote => remote.payload.clone(),
        ConflictStrategy::Merge => {
            if remote.last_modified > local.last_modified {
                overlay_missing(&remote.payload, &local.payload)
            } else {
                overlay_missing(&local.payload, &remote.payload)
            }
        }
    };

    SyncRecord {
        id: local.id,
        payload,
        version: local.version.max(remote.version) + 1,
        last_modified: Utc::now(),
        last_synced_at: None,
        origin_device: device,
        tombstone: local.tombstone || remote.tombstone,
    }
}

/// Shallow field union: keys of `other` absent from `base` are added,
/// shared keys keep the base value. Non-object payloads take `base` as is.
fn overlay_missing(base: &Value, other: &Value) -> Value {
    match (base, other) {
        (Value::Object(base_map), Value::Object(other_map)) => {
            let mut merged = base_map.clone();
            for (key, value) in other_map {
                merged.entry(key.clone()).or_insert_with(|| value.clone());
            }
            Value::Object(merged)
        }
        _ => base.clone(),
    }
}
