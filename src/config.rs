use budget_sync_core::NetworkClass;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Where batches are relayed. Which of these is used is decided by the
/// `storage_provider` sync setting.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct ProviderConfig {
    /// Shared directory for the local folder provider
    /// (default: `<data_dir>/shared`)
    pub folder: Option<PathBuf>,
    /// Base URL of a budgetsync relay (e.g. "http://localhost:8080")
    pub relay_url: Option<String>,
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Directory holding records, the batch queue and sync state
    pub data_dir: ConfigValue<PathBuf>,
    /// Network class reported to the sync engine
    pub network: ConfigValue<NetworkClass>,
    /// First retry delay of a failing provider call, doubled per attempt
    pub retry_base_delay_ms: ConfigValue<u64>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub provider: ProviderConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    data_dir: Option<PathBuf>,
    network: Option<NetworkClass>,
    retry_base_delay_ms: Option<u64>,
    provider: Option<ProviderConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut data_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut network = ConfigValue::new(NetworkClass::Wifi, ConfigSource::Default);
        let mut retry_base_delay_ms = ConfigValue::new(500, ConfigSource::Default);
        let mut config_file = None;
        let mut provider = ProviderConfig::default();

        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            if let Some(dir) = file_config.data_dir {
                data_dir = ConfigValue::new(resolve_relative(&path, dir), ConfigSource::File);
            }
            if let Some(class) = file_config.network {
                network = ConfigValue::new(class, ConfigSource::File);
            }
            if let Some(ms) = file_config.retry_base_delay_ms {
                retry_base_delay_ms = ConfigValue::new(ms, ConfigSource::File);
            }
            if let Some(mut provider_config) = file_config.provider {
                provider_config.folder = provider_config
                    .folder
                    .map(|folder| resolve_relative(&path, folder));
                provider = provider_config;
            }

            config_file = Some(path);
        }

        if let Ok(dir) = std::env::var("BUDGETSYNC_DATA_DIR") {
            data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("BUDGETSYNC_NETWORK") {
            let class = NetworkClass::parse(&value)
                .ok_or_else(|| ConfigError::InvalidValue("BUDGETSYNC_NETWORK", value))?;
            network = ConfigValue::new(class, ConfigSource::Environment);
        }
        if let Ok(value) = std::env::var("BUDGETSYNC_RETRY_BASE_DELAY_MS") {
            let ms = value
                .parse()
                .map_err(|_| ConfigError::InvalidValue("BUDGETSYNC_RETRY_BASE_DELAY_MS", value))?;
            retry_base_delay_ms = ConfigValue::new(ms, ConfigSource::Environment);
        }
        if let Ok(folder) = std::env::var("BUDGETSYNC_FOLDER") {
            provider.folder = Some(PathBuf::from(folder));
        }
        if let Ok(url) = std::env::var("BUDGETSYNC_RELAY_URL") {
            provider.relay_url = Some(url);
        }

        Ok(Self {
            data_dir,
            network,
            retry_base_delay_ms,
            config_file,
            provider,
        })
    }

    /// Shared folder used by the local folder provider.
    pub fn folder(&self) -> PathBuf {
        self.provider
            .folder
            .clone()
            .unwrap_or_else(|| self.data_dir.value.join("shared"))
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/budgetsync/
    /// - macOS: ~/Library/Application Support/budgetsync/
    /// - Windows: %APPDATA%/budgetsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("budgetsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/budgetsync/
    /// - macOS: ~/Library/Application Support/budgetsync/
    /// - Windows: %APPDATA%/budgetsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("budgetsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }
}

/// Relative paths in a config file are relative to the file's directory.
fn resolve_relative(config_path: &Path, path: PathBuf) -> PathBuf {
    if path.is_relative() {
        config_path
            .parent()
            .map(|p| p.join(&path))
            .unwrap_or(path)
    } else {
        path
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
    InvalidValue(&'static str, String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::InvalidValue(var, value) => {
                write!(f, "Invalid value '{}' for {}", value, var)
            }
        }
    }
}

impl std::error::Error for ConfigError {}
