//! Device identity.
//!
//! Every install generates a random device ID once and keeps it in the data
//! directory. The ID travels with every record it mutates and every batch it
//! assembles, so it must be stable for the lifetime of the install.

use std::fs;
use std::io;
use std::path::Path;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Errors that can occur with device IDs
#[derive(Error, Debug)]
pub enum DeviceIdError {
    #[error("Invalid device ID: {0}")]
    InvalidFormat(String),

    #[error("I/O error for device ID file: {0}")]
    Io(#[from] io::Error),
}

/// Identifier of the device that originated a change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceId(Uuid);

impl DeviceId {
    /// Generate a new random device ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Get as UUID
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }

    /// Loads the device ID stored at `path`, generating and saving one on first use.
    pub fn load_or_create(path: &Path) -> Result<Self, DeviceIdError> {
        match fs::read_to_string(path) {
            Ok(contents) => contents.trim().parse(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let id = Self::new();
                if let Some(parent) = path.parent() {
                    fs::create_dir_all(parent)?;
                }
                fs::write(path, id.to_string())?;
                Ok(id)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Default for DeviceId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.simple())
    }
}

impl FromStr for DeviceId {
    type Err = DeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| DeviceIdError::InvalidFormat(s.to_string()))
    }
}

impl Serialize for DeviceId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for DeviceId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
