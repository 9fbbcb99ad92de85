use budget_sync_core::SyncConfigPatch;
use clap::{Args, Subcommand};
use std::fs;
use std::io::Write;
use std::path::PathBuf;

use super::OutputFormat;
use budgetsync::{engine, Config};

#[derive(Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub command: ConfigSubcommand,
}

#[derive(Subcommand)]
pub enum ConfigSubcommand {
    /// Show current configuration values
    Show {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Change a sync setting (e.g. `conflict_strategy manual`)
    Set {
        /// Setting name
        key: String,

        /// New value
        value: String,
    },

    /// Initialize configuration file
    Init,
}

const DEFAULT_CONFIG: &str = r#"# budgetsync configuration

# Directory for records, the batch queue and sync state
# (default: ~/.local/share/budgetsync)
# data_dir: ~/.local/share/budgetsync

# Network reported to the sync engine: wifi, ethernet, cellular or offline
network: wifi

# First retry delay for a failing provider call, doubled per attempt
retry_base_delay_ms: 500

provider:
  # Shared folder for the local_folder provider (default: <data_dir>/shared)
  # folder: ~/Dropbox/budgetsync
  # Relay URL for the http_relay provider
  # relay_url: http://localhost:8080
"#;

impl ConfigCommand {
    pub fn run(
        &self,
        config: &Config,
        cli_config_path: Option<PathBuf>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            ConfigSubcommand::Show { format } => {
                let sync = engine::open_state(config)?.config();
                match format {
                    OutputFormat::Json => {
                        let combined = serde_json::json!({
                            "app": config,
                            "sync": sync,
                        });
                        println!("{}", serde_json::to_string_pretty(&combined)?);
                    }
                    OutputFormat::Text => {
                        println!("Configuration");
                        println!("=============\n");

                        if let Some(path) = &config.config_file {
                            println!("Config file: {}", path.display());
                        } else {
                            println!(
                                "Config file: {} (not found)",
                                Config::default_config_path().display()
                            );
                        }
                        println!();

                        println!("data_dir: {}", config.data_dir.value.display());
                        println!("  source: {}", config.data_dir.source);
                        println!("network: {}", config.network.value);
                        println!("  source: {}", config.network.source);
                        println!("retry_base_delay_ms: {}", config.retry_base_delay_ms.value);
                        println!("  source: {}", config.retry_base_delay_ms.source);
                        println!("provider.folder: {}", config.folder().display());
                        println!(
                            "provider.relay_url: {}",
                            config.provider.relay_url.as_deref().unwrap_or("(not set)")
                        );
                        println!();

                        println!("Sync settings");
                        println!("-------------");
                        println!("auto_sync: {}", sync.auto_sync);
                        println!("sync_interval_minutes: {}", sync.sync_interval_minutes);
                        println!("sync_on_startup: {}", sync.sync_on_startup);
                        println!("sync_only_on_wifi: {}", sync.sync_only_on_wifi);
                        println!("enable_encryption: {}", sync.enable_encryption);
                        println!("storage_provider: {}", sync.storage_provider);
                        println!("conflict_strategy: {}", sync.conflict_strategy);
                        println!("max_sync_retries: {}", sync.max_sync_retries);
                    }
                }
                Ok(())
            }

            ConfigSubcommand::Set { key, value } => {
                let patch = SyncConfigPatch::from_key_value(key, value)?;
                let store = engine::open_state(config)?;
                let updated = store.update_config(&patch)?;
                store.shutdown()?;

                println!("Updated {}.", key);
                if patch.enable_encryption.is_some() && updated.enable_encryption {
                    println!(
                        "All devices must share one install key; see 'budgetsync device key export'."
                    );
                }
                Ok(())
            }

            ConfigSubcommand::Init => {
                let config_path = cli_config_path.unwrap_or_else(Config::default_config_path);

                // Check if config already exists
                if config_path.exists() {
                    println!("Config file already exists: {}", config_path.display());
                    println!("Use 'budgetsync config show' to view current configuration.");
                    return Ok(());
                }

                // Create parent directory
                if let Some(parent) = config_path.parent() {
                    fs::create_dir_all(parent)?;
                }

                let mut file = fs::File::create(&config_path)?;
                file.write_all(DEFAULT_CONFIG.as_bytes())?;

                println!("Created config file: {}", config_path.display());
                println!("\nEdit this file to customize your settings.");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config_loads() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("config.yaml");
        fs::write(&config_path, DEFAULT_CONFIG).unwrap();

        let config = Config::load(Some(config_path.clone())).unwrap();
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(config.retry_base_delay_ms.value, 500);
    }
}
