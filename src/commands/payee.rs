use budget_sync_core::{Payee, SyncOrchestrator};
use clap::{Args, Subcommand};
use uuid::Uuid;

use super::{queue_changes, OutputFormat};

#[derive(Args)]
pub struct PayeeCommand {
    #[command(subcommand)]
    pub command: PayeeSubcommand,
}

#[derive(Subcommand)]
pub enum PayeeSubcommand {
    /// Add a payee
    Add {
        /// Payee name
        name: String,

        /// Category suggested for this payee's transactions
        #[arg(long)]
        category: Option<String>,
    },

    /// Remove a payee
    Remove {
        /// Payee ID
        id: Uuid,
    },

    /// List payees
    List {
        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl PayeeCommand {
    pub fn run(&self, engine: &SyncOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
        let payees = engine.writer::<Payee>();

        match &self.command {
            PayeeSubcommand::Add { name, category } => {
                if name.trim().is_empty() {
                    return Err("Payee name cannot be empty".into());
                }
                let mut payee = Payee::new(name.trim());
                if let Some(category) = category {
                    payee = payee.with_default_category(category);
                }

                let created = payees.create(payee)?;
                println!("Created payee {} ({})", created.id, created.payload.name);
                queue_changes(engine)
            }

            PayeeSubcommand::Remove { id } => {
                let removed = payees.delete(*id)?;
                println!("Removed payee {} ({})", id, removed.payload.name);
                queue_changes(engine)
            }

            PayeeSubcommand::List { format } => {
                let list = payees.list()?;
                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&list)?),
                    OutputFormat::Text => {
                        if list.is_empty() {
                            println!("No payees found.");
                        }
                        for record in &list {
                            match &record.payload.default_category {
                                Some(category) => {
                                    println!("{}  {} [{}]", record.id, record.payload.name, category)
                                }
                                None => println!("{}  {}", record.id, record.payload.name),
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
