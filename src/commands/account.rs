use budget_sync_core::{Account, AccountKind, SyncOrchestrator};
use clap::{Args, Subcommand};
use uuid::Uuid;

use super::{format_amount, parse_amount, queue_changes, OutputFormat};

#[derive(Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    pub command: AccountSubcommand,
}

#[derive(Subcommand)]
pub enum AccountSubcommand {
    /// Add a new account
    Add {
        /// Name of the account
        name: String,

        /// ISO 4217 currency code
        #[arg(long, default_value = "USD")]
        currency: String,

        /// Account kind (checking, savings, credit, cash, investment)
        #[arg(long, default_value = "checking")]
        kind: AccountKind,

        /// Opening balance (e.g. 1200.50)
        #[arg(long, allow_hyphen_values = true)]
        opening_balance: Option<String>,

        /// Free-form notes
        #[arg(long)]
        notes: Option<String>,
    },

    /// Rename an account
    Rename {
        /// Account ID
        id: Uuid,

        /// New name
        name: String,
    },

    /// Remove an account
    Remove {
        /// Account ID
        id: Uuid,
    },

    /// List accounts
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl AccountCommand {
    pub fn run(&self, engine: &SyncOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
        let accounts = engine.writer::<Account>();

        match &self.command {
            AccountSubcommand::Add {
                name,
                currency,
                kind,
                opening_balance,
                notes,
            } => {
                if name.trim().is_empty() {
                    return Err("Account name cannot be empty".into());
                }

                let mut account = Account::new(name.trim(), currency.to_uppercase()).with_kind(*kind);
                if let Some(balance) = opening_balance {
                    account = account.with_opening_balance(parse_amount(balance)?);
                }
                if let Some(notes) = notes {
                    account = account.with_notes(notes);
                }

                let created = accounts.create(account)?;
                println!("Created account {}", created.id);
                println!("  {}", created.payload);
                queue_changes(engine)
            }

            AccountSubcommand::Rename { id, name } => {
                if name.trim().is_empty() {
                    return Err("Account name cannot be empty".into());
                }
                let current = accounts
                    .get(*id)?
                    .ok_or_else(|| format!("Account not found: {}", id))?;

                let mut account = current.payload;
                account.name = name.trim().to_string();
                let updated = accounts.update(*id, account)?;
                println!("Renamed account {} (version {})", id, updated.version);
                queue_changes(engine)
            }

            AccountSubcommand::Remove { id } => {
                let removed = accounts.delete(*id)?;
                println!("Removed account {} ({})", id, removed.payload.name);
                queue_changes(engine)
            }

            AccountSubcommand::List { format } => {
                let list = accounts.list()?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&list)?),
                    OutputFormat::Text => {
                        if list.is_empty() {
                            println!("No accounts found.");
                            return Ok(());
                        }
                        for record in &list {
                            let marker = if record.is_pending() { "*" } else { " " };
                            println!(
                                "{} {}  {:<24} {:<10} {} {}",
                                marker,
                                record.id,
                                record.payload.name,
                                record.payload.kind,
                                record.payload.currency,
                                format_amount(record.payload.opening_balance)
                            );
                        }
                        println!();
                        println!("* not yet synced");
                    }
                }
                Ok(())
            }
        }
    }
}
