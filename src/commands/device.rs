//! Device management commands.

use budget_sync_core::{DeviceId, InstallKey};
use clap::{Args, Subcommand};

use budgetsync::{engine, Config, DataPaths};

/// Manage device identity
#[derive(Args)]
pub struct DeviceCommand {
    #[command(subcommand)]
    command: DeviceSubcommand,
}

#[derive(Subcommand)]
enum DeviceSubcommand {
    /// Show this device's identity
    Show,

    /// Share the install key between devices
    Key {
        #[command(subcommand)]
        command: KeySubcommand,
    },
}

#[derive(Subcommand)]
enum KeySubcommand {
    /// Print the install key for copying to another device
    Export,

    /// Replace this device's install key with one exported elsewhere
    Import {
        /// Hex-encoded key from 'budgetsync device key export'
        key: String,

        /// Replace an existing key
        #[arg(long, short)]
        force: bool,
    },
}

impl DeviceCommand {
    pub fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        let paths = DataPaths::new(&config.data_dir.value);

        match &self.command {
            DeviceSubcommand::Show => {
                let device = DeviceId::load_or_create(&paths.device_id())?;
                let sync = engine::open_state(config)?.config();

                println!("Device");
                println!("======");
                println!();
                println!("ID:         {}", device);
                println!("Data dir:   {}", paths.root().display());
                println!(
                    "Encryption: {}",
                    if sync.enable_encryption {
                        "enabled"
                    } else {
                        "disabled"
                    }
                );
                println!(
                    "Key file:   {}{}",
                    paths.install_key().display(),
                    if paths.install_key().exists() {
                        ""
                    } else {
                        " (created on first sync)"
                    }
                );
                Ok(())
            }

            DeviceSubcommand::Key {
                command: KeySubcommand::Export,
            } => {
                let key = engine::install_key(config)?;
                println!("{}", key.to_hex());
                eprintln!();
                eprintln!("On your other devices run:");
                eprintln!("  budgetsync device key import <key>");
                Ok(())
            }

            DeviceSubcommand::Key {
                command: KeySubcommand::Import { key, force },
            } => {
                let key = InstallKey::from_hex(key)?;
                let path = paths.install_key();
                if path.exists() && !*force {
                    return Err(format!(
                        "An install key already exists at {}. Use --force to replace it.",
                        path.display()
                    )
                    .into());
                }

                key.save(&path)?;
                println!("Imported install key.");
                Ok(())
            }
        }
    }
}
