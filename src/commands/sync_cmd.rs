//! Sync CLI commands: run cycles, inspect state, resolve conflicts.

use budget_sync_core::{
    ConflictStrategy, CredentialStore, DataType, ProviderAuth, ProviderKind, SyncConflict,
    SyncScheduler, SyncState, SyncStatus, SyncTrigger,
};
use chrono::{DateTime, Duration, Utc};
use clap::{Args, Subcommand};
use tokio::sync::watch;
use uuid::Uuid;

use super::OutputFormat;
use budgetsync::{engine, Config};

/// Sync with the configured storage provider
#[derive(Args)]
pub struct SyncCommand {
    #[command(subcommand)]
    command: Option<SyncSubcommand>,
}

#[derive(Subcommand)]
enum SyncSubcommand {
    /// Show sync status
    Status {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// List conflicts waiting for a decision
    Conflicts {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Resolve one conflict
    Resolve {
        /// Record type (account, transaction, payee, ...)
        data_type: String,

        /// Record ID
        id: Uuid,

        /// use_local, use_remote or merge
        #[arg(long, short)]
        strategy: ConflictStrategy,
    },

    /// Sync at startup and then on the configured interval until interrupted
    Watch,

    /// Store credentials for the storage provider
    Login {
        /// Access token
        #[arg(long)]
        token: String,

        /// Account or folder name on the provider
        #[arg(long, default_value = "default")]
        account: String,

        /// Provider to log in to (default: the configured one)
        #[arg(long)]
        provider: Option<String>,

        /// Token lifetime in days
        #[arg(long)]
        expires_in_days: Option<i64>,
    },

    /// Forget stored credentials
    Logout {
        /// Provider to log out of (default: the configured one)
        #[arg(long)]
        provider: Option<String>,
    },
}

impl SyncCommand {
    pub async fn run(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        match &self.command {
            None => self.sync(config).await,
            Some(SyncSubcommand::Status { format }) => self.status(config, format),
            Some(SyncSubcommand::Conflicts { format }) => self.conflicts(config, format),
            Some(SyncSubcommand::Resolve {
                data_type,
                id,
                strategy,
            }) => self.resolve(config, data_type, *id, *strategy),
            Some(SyncSubcommand::Watch) => self.watch(config).await,
            Some(SyncSubcommand::Login {
                token,
                account,
                provider,
                expires_in_days,
            }) => self.login(config, token, account, provider.as_deref(), *expires_in_days),
            Some(SyncSubcommand::Logout { provider }) => self.logout(config, provider.as_deref()),
        }
    }

    async fn sync(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        engine::require_provider(config)?;
        let engine = engine::open(config, true)?;

        println!("Syncing with {}...", engine.config().storage_provider);
        let state = engine.trigger(SyncTrigger::Manual).await?;
        print_outcome(&state);

        engine.shutdown()?;
        Ok(())
    }

    fn status(&self, config: &Config, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
        let store = engine::open_state(config)?;
        let state = store.state();
        let sync_config = store.config();

        if let OutputFormat::Json = format {
            println!("{}", serde_json::to_string_pretty(&state)?);
            return Ok(());
        }

        println!("Sync Status");
        println!("===========");
        println!();
        println!("Status:          {}", state.status);
        if let Some(op) = &state.current_operation {
            println!("Operation:       {} ({}%)", op, state.progress_percent);
        }
        println!("Last attempt:    {}", format_time(state.last_sync_attempt));
        println!("Last success:    {}", format_time(state.last_successful_sync));
        println!("Pending changes: {}", state.pending_changes);
        if !state.conflicts.is_empty() {
            println!("Conflicts:       {}", state.conflicts.len());
        }
        if let Some(error) = &state.error {
            println!("Error:           {}", error);
        }
        println!();

        let provider = sync_config.storage_provider;
        let credentials = engine::credentials(config);
        let auth = match credentials.get_auth(provider)? {
            Some(auth) => format!("logged in as {}", auth.account),
            None => "not logged in".to_string(),
        };
        println!("Provider:        {} ({})", provider, auth);
        println!(
            "Auto-sync:       {}",
            if sync_config.auto_sync {
                format!("every {} min", sync_config.sync_interval_minutes)
            } else {
                "disabled".to_string()
            }
        );
        println!("Strategy:        {}", sync_config.conflict_strategy);
        println!("Network:         {}", config.network.value);

        Ok(())
    }

    fn conflicts(&self, config: &Config, format: &OutputFormat) -> Result<(), Box<dyn std::error::Error>> {
        let state = engine::open_state(config)?.state();

        if let OutputFormat::Json = format {
            println!("{}", serde_json::to_string_pretty(&state.conflicts)?);
            return Ok(());
        }

        if state.conflicts.is_empty() {
            println!("No conflicts.");
            return Ok(());
        }

        for conflict in &state.conflicts {
            print_conflict(conflict)?;
        }
        println!("Resolve with: budgetsync sync resolve <type> <id> --strategy <use_local|use_remote|merge>");
        Ok(())
    }

    fn resolve(
        &self,
        config: &Config,
        data_type: &str,
        id: Uuid,
        strategy: ConflictStrategy,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let data_type =
            DataType::parse(data_type).ok_or_else(|| format!("Unknown record type: {}", data_type))?;
        let engine = engine::open(config, true)?;

        let state = engine.resolve_conflict(data_type, id, strategy)?;
        println!("Resolved {} {} with {}.", data_type, id, strategy);

        if state.status == SyncStatus::ConflictPending {
            println!("{} conflict(s) remaining.", state.conflicts.len());
        } else {
            println!("All conflicts resolved. Run 'budgetsync sync' to upload the resolutions.");
        }

        engine.shutdown()?;
        Ok(())
    }

    async fn watch(&self, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
        engine::require_provider(config)?;
        let engine = engine::open(config, false)?;
        let (stop, stopped) = watch::channel(false);

        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("Interrupted, finishing current sync");
                let _ = stop.send(true);
            }
        });

        println!("Watching for changes. Press Ctrl-C to stop.");
        SyncScheduler::new(&engine).run(stopped).await;

        print_outcome(&engine.state());
        engine.shutdown()?;
        Ok(())
    }

    fn login(
        &self,
        config: &Config,
        token: &str,
        account: &str,
        provider: Option<&str>,
        expires_in_days: Option<i64>,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let provider = selected_provider(config, provider)?;
        if token.trim().is_empty() {
            return Err("Token cannot be empty".into());
        }

        let mut auth = ProviderAuth::new(provider, token.trim(), account);
        if let Some(days) = expires_in_days {
            auth = auth.with_expiry(Utc::now() + Duration::days(days));
        }
        engine::credentials(config).save_auth(auth)?;

        println!("Logged in to {} as {}.", provider, account);
        Ok(())
    }

    fn logout(&self, config: &Config, provider: Option<&str>) -> Result<(), Box<dyn std::error::Error>> {
        let provider = selected_provider(config, provider)?;
        engine::credentials(config).clear_auth(provider)?;
        println!("Logged out of {}.", provider);
        Ok(())
    }
}

fn selected_provider(
    config: &Config,
    provider: Option<&str>,
) -> Result<ProviderKind, Box<dyn std::error::Error>> {
    match provider {
        Some(name) => ProviderKind::parse(name)
            .ok_or_else(|| format!("Unknown storage provider: {}", name).into()),
        None => Ok(engine::open_state(config)?.config().storage_provider),
    }
}

fn format_time(time: Option<DateTime<Utc>>) -> String {
    time.map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| "never".to_string())
}

fn print_outcome(state: &SyncState) {
    match &state.status {
        SyncStatus::Completed => {
            println!("✓ Sync complete.");
            if let Some(error) = &state.error {
                println!("  with problems: {}", error);
            }
        }
        SyncStatus::ConflictPending => {
            println!("! {} conflict(s) need a decision.", state.conflicts.len());
            println!("  Run 'budgetsync sync conflicts' to review them.");
        }
        SyncStatus::Failed => match &state.error {
            Some(error) => println!("✗ Sync failed: {}", error),
            None => println!("✗ Sync failed."),
        },
        SyncStatus::Idle => {
            let reason = state.current_operation.as_deref().unwrap_or("nothing to do");
            println!("- Sync skipped: {}", reason);
        }
        other => println!("Sync status: {}", other),
    }
    if state.pending_changes > 0 {
        println!("  {} change(s) waiting to upload.", state.pending_changes);
    }
}

fn print_conflict(conflict: &SyncConflict) -> Result<(), serde_json::Error> {
    println!("{} {}", conflict.data_type, conflict.record_id());
    println!("  fields: {}", conflict.conflict_fields.join(", "));
    for (side, record) in [("local", &conflict.local), ("remote", &conflict.remote)] {
        let deleted = if record.tombstone { " (deleted)" } else { "" };
        println!(
            "  {:<6} v{} {}{}: {}",
            side,
            record.version,
            record.last_modified.format("%Y-%m-%d %H:%M"),
            deleted,
            serde_json::to_string(&record.payload)?
        );
    }
    println!();
    Ok(())
}
