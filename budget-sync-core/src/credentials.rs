//! Provider credentials.
//!
//! Tokens are kept outside the state store in a file readable only by the
//! owner. An expired credential is treated as absent so the orchestrator
//! asks the user to sign in again instead of failing on the provider.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::fs_atomic::write_private;
use crate::state::ProviderKind;

/// Credentials for one storage provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderAuth {
    pub provider: ProviderKind,
    pub token: String,
    /// Provider-side account or namespace the batches live under
    pub account: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ProviderAuth {
    pub fn new(provider: ProviderKind, token: impl Into<String>, account: impl Into<String>) -> Self {
        Self {
            provider,
            token: token.into(),
            account: account.into(),
            expires_at: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

#[derive(Error, Debug)]
pub enum CredentialError {
    #[error("I/O error for {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to parse credentials: {0}")]
    Parse(String),

    #[error("Credential store lock poisoned")]
    LockPoisoned,
}

/// Secure storage for provider credentials.
pub trait CredentialStore: Send + Sync {
    /// Returns usable credentials, or `None` when missing or expired.
    fn get_auth(&self, provider: ProviderKind) -> Result<Option<ProviderAuth>, CredentialError>;

    fn save_auth(&self, auth: ProviderAuth) -> Result<(), CredentialError>;

    /// Forgets the credentials of `provider`. Clearing absent credentials is not an error.
    fn clear_auth(&self, provider: ProviderKind) -> Result<(), CredentialError>;
}

type AuthMap = BTreeMap<String, ProviderAuth>;

/// Credential store backed by an owner-only JSON file keyed by provider id.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn io_error(&self) -> impl FnOnce(io::Error) -> CredentialError + '_ {
        move |source| CredentialError::Io {
            path: self.path.clone(),
            source,
        }
    }

    fn load(&self) -> Result<AuthMap, CredentialError> {
        match fs::read(&self.path) {
            Ok(bytes) => {
                serde_json::from_slice(&bytes).map_err(|e| CredentialError::Parse(e.to_string()))
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(AuthMap::new()),
            Err(e) => Err(self.io_error()(e)),
        }
    }

    fn save(&self, map: &AuthMap) -> Result<(), CredentialError> {
        let bytes =
            serde_json::to_vec_pretty(map).map_err(|e| CredentialError::Parse(e.to_string()))?;
        write_private(&self.path, &bytes).map_err(self.io_error())
    }
}

impl CredentialStore for FileCredentialStore {
    fn get_auth(&self, provider: ProviderKind) -> Result<Option<ProviderAuth>, CredentialError> {
        let _guard = self.lock.lock().map_err(|_| CredentialError::LockPoisoned)?;
        let auth = self.load()?.remove(provider.id());
        Ok(auth.filter(|a| !a.is_expired(Utc::now())))
    }

    fn save_auth(&self, auth: ProviderAuth) -> Result<(), CredentialError> {
        let _guard = self.lock.lock().map_err(|_| CredentialError::LockPoisoned)?;
        let mut map = self.load()?;
        map.insert(auth.provider.id().to_string(), auth);
        self.save(&map)
    }

    fn clear_auth(&self, provider: ProviderKind) -> Result<(), CredentialError> {
        let _guard = self.lock.lock().map_err(|_| CredentialError::LockPoisoned)?;
        let mut map = self.load()?;
        if map.remove(provider.id()).is_some() {
            self.save(&map)?;
        }
        Ok(())
    }
}
