use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

use budgetsync::{engine, Config};
use commands::{
    AccountCommand, ConfigCommand, DeviceCommand, PayeeCommand, SyncCommand, TxnCommand,
};

#[derive(Parser)]
#[command(name = "budgetsync")]
#[command(version)]
#[command(about = "Offline-first personal finance ledger with multi-device sync", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage accounts
    Account(AccountCommand),

    /// Manage payees
    Payee(PayeeCommand),

    /// Record and list transactions
    Txn(TxnCommand),

    /// Sync with the configured storage provider
    Sync(SyncCommand),

    /// Manage configuration
    Config(ConfigCommand),

    /// Show device identity and share the install key
    Device(DeviceCommand),
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "budgetsync=info,budget_sync_core=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run().await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Save config path for init command
    let cli_config_path = cli.config.clone();

    // Load configuration
    let config = Config::load(cli.config)?;

    match cli.command {
        Some(Commands::Account(cmd)) => {
            let engine = engine::open(&config, true)?;
            cmd.run(&engine)?;
            engine.shutdown()?;
        }
        Some(Commands::Payee(cmd)) => {
            let engine = engine::open(&config, true)?;
            cmd.run(&engine)?;
            engine.shutdown()?;
        }
        Some(Commands::Txn(cmd)) => {
            let engine = engine::open(&config, true)?;
            cmd.run(&engine)?;
            engine.shutdown()?;
        }
        Some(Commands::Sync(cmd)) => {
            cmd.run(&config).await?;
        }
        Some(Commands::Config(cmd)) => {
            cmd.run(&config, cli_config_path)?;
        }
        Some(Commands::Device(cmd)) => {
            cmd.run(&config)?;
        }
        None => {
            println!("Use --help to see available commands");
        }
    }

    Ok(())
}
