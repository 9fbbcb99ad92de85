//! API keys accepted by the relay.
//!
//! ```yaml
//! api_keys:
//!   - key: "your-secret-key-here"
//!     user_id: "alice"
//! ```
//!
//! Every device of one user shares that user's batch folder, so the user ID
//! is what separates households on a shared relay.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

/// API key entry in config
#[derive(Debug, Clone, Deserialize)]
struct ApiKeyEntry {
    key: String,
    user_id: String,
}

/// Config file structure
#[derive(Debug, Clone, Deserialize, Default)]
struct KeysFile {
    #[serde(default)]
    api_keys: Vec<ApiKeyEntry>,
}

/// Authenticated user info, added to request extensions after auth
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthUser {
    pub user_id: String,
}

/// API key store - maps key -> AuthUser
#[derive(Debug, Clone, Default)]
pub struct ApiKeyStore {
    keys: HashMap<String, AuthUser>,
}

impl ApiKeyStore {
    /// Load API keys from config file.
    ///
    /// A missing or unreadable file yields an empty store, which rejects
    /// every authenticated request.
    pub fn load(config_path: &Path) -> Self {
        let contents = match std::fs::read_to_string(config_path) {
            Ok(contents) => contents,
            Err(e) => {
                tracing::warn!(
                    "Failed to read config file {}: {}",
                    config_path.display(),
                    e
                );
                tracing::warn!("No API keys loaded - all authenticated requests will fail");
                return Self::default();
            }
        };

        match Self::parse(&contents) {
            Ok(store) => {
                tracing::info!("Loaded {} API key(s)", store.len());
                store
            }
            Err(e) => {
                tracing::warn!("Failed to parse config file: {}", e);
                Self::default()
            }
        }
    }

    /// Parses the YAML key list.
    pub fn parse(contents: &str) -> Result<Self, serde_yaml::Error> {
        let file: KeysFile = serde_yaml::from_str(contents)?;
        let keys = file
            .api_keys
            .into_iter()
            .map(|entry| {
                (
                    entry.key,
                    AuthUser {
                        user_id: entry.user_id,
                    },
                )
            })
            .collect();
        Ok(Self { keys })
    }

    /// Validate an API key and return the associated user
    pub fn validate(&self, key: &str) -> Option<AuthUser> {
        self.keys.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KEYS: &str = r#"
api_keys:
  - key: "alice-phone"
    user_id: "alice"
  - key: "alice-laptop"
    user_id: "alice"
  - key: "bob-key"
    user_id: "bob"
"#;

    #[test]
    fn test_parse_and_validate() {
        let store = ApiKeyStore::parse(KEYS).unwrap();
        assert_eq!(store.len(), 3);
        assert_eq!(store.validate("alice-laptop").unwrap().user_id, "alice");
        assert_eq!(store.validate("bob-key").unwrap().user_id, "bob");
        assert!(store.validate("nope").is_none());
    }

    #[test]
    fn test_missing_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let store = ApiKeyStore::load(&temp.path().join("missing.yaml"));
        assert!(store.is_empty());
    }

    #[test]
    fn test_malformed_file_is_empty() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yaml");
        std::fs::write(&path, "api_keys: [").unwrap();

        assert!(ApiKeyStore::load(&path).is_empty());
    }
}
