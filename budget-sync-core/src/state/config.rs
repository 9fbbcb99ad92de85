//! User-editable sync settings.

use serde::{Deserialize, Serialize};

use crate::resolver::ConflictStrategy;

/// Third-party storage backends the engine can relay batches through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// A directory kept in sync by a desktop file-sync client.
    #[default]
    LocalFolder,
    /// The budgetsync relay server.
    HttpRelay,
    Dropbox,
    GoogleDrive,
    OneDrive,
}

impl ProviderKind {
    /// Stable identifier used to key stored credentials.
    pub fn id(&self) -> &'static str {
        match self {
            ProviderKind::LocalFolder => "local_folder",
            ProviderKind::HttpRelay => "http_relay",
            ProviderKind::Dropbox => "dropbox",
            ProviderKind::GoogleDrive => "google_drive",
            ProviderKind::OneDrive => "one_drive",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase().replace('-', "_");
        [
            ProviderKind::LocalFolder,
            ProviderKind::HttpRelay,
            ProviderKind::Dropbox,
            ProviderKind::GoogleDrive,
            ProviderKind::OneDrive,
        ]
        .into_iter()
        .find(|p| p.id() == s)
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.id())
    }
}

/// Sync configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Sync automatically on the interval timer
    pub auto_sync: bool,
    pub sync_interval_minutes: u32,
    /// Sync once when the application starts
    pub sync_on_startup: bool,
    /// Only sync automatically on unmetered networks
    pub sync_only_on_wifi: bool,
    /// Seal batches with the install key
    pub enable_encryption: bool,
    pub storage_provider: ProviderKind,
    pub conflict_strategy: ConflictStrategy,
    /// Retries per transport call after the first attempt
    pub max_sync_retries: u32,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            auto_sync: true,
            sync_interval_minutes: 15,
            sync_on_startup: true,
            sync_only_on_wifi: false,
            enable_encryption: true,
            storage_provider: ProviderKind::default(),
            conflict_strategy: ConflictStrategy::default(),
            max_sync_retries: 3,
        }
    }
}

/// Partial update of [`SyncConfig`]; only present fields are applied.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfigPatch {
    pub auto_sync: Option<bool>,
    pub sync_interval_minutes: Option<u32>,
    pub sync_on_startup: Option<bool>,
    pub sync_only_on_wifi: Option<bool>,
    pub enable_encryption: Option<bool>,
    pub storage_provider: Option<ProviderKind>,
    pub conflict_strategy: Option<ConflictStrategy>,
    pub max_sync_retries: Option<u32>,
}

impl SyncConfigPatch {
    /// Overlays the present fields onto `config`.
    pub fn apply(&self, config: &mut SyncConfig) {
        if let Some(v) = self.auto_sync {
            config.auto_sync = v;
        }
        if let Some(v) = self.sync_interval_minutes {
            config.sync_interval_minutes = v.max(1);
        }
        if let Some(v) = self.sync_on_startup {
            config.sync_on_startup = v;
        }
        if let Some(v) = self.sync_only_on_wifi {
            config.sync_only_on_wifi = v;
        }
        if let Some(v) = self.enable_encryption {
            config.enable_encryption = v;
        }
        if let Some(v) = self.storage_provider {
            config.storage_provider = v;
        }
        if let Some(v) = self.conflict_strategy {
            config.conflict_strategy = v;
        }
        if let Some(v) = self.max_sync_retries {
            config.max_sync_retries = v;
        }
    }

    /// Builds a single-field patch from a `key` / `value` pair as typed on
    /// the command line.
    pub fn from_key_value(key: &str, value: &str) -> Result<Self, String> {
        let mut patch = Self::default();
        let key = key.replace('-', "_");

        fn flag(value: &str) -> Result<bool, String> {
            match value.to_lowercase().as_str() {
                "true" | "on" | "yes" | "1" => Ok(true),
                "false" | "off" | "no" | "0" => Ok(false),
                other => Err(format!("expected a boolean, got '{}'", other)),
            }
        }

        fn number(value: &str) -> Result<u32, String> {
            value
                .parse()
                .map_err(|_| format!("expected a number, got '{}'", value))
        }

        match key.as_str() {
            "auto_sync" => patch.auto_sync = Some(flag(value)?),
            "sync_interval_minutes" => patch.sync_interval_minutes = Some(number(value)?),
            "sync_on_startup" => patch.sync_on_startup = Some(flag(value)?),
            "sync_only_on_wifi" => patch.sync_only_on_wifi = Some(flag(value)?),
            "enable_encryption" => patch.enable_encryption = Some(flag(value)?),
            "storage_provider" => {
                patch.storage_provider = Some(
                    ProviderKind::parse(value)
                        .ok_or_else(|| format!("unknown storage provider '{}'", value))?,
                )
            }
            "conflict_strategy" => patch.conflict_strategy = Some(value.parse()?),
            "max_sync_retries" => patch.max_sync_retries = Some(number(value)?),
            other => return Err(format!("unknown sync setting '{}'", other)),
        }

        Ok(patch)
    }
}
