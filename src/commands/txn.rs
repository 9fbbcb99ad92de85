use budget_sync_core::{Account, Payee, SyncOrchestrator, Transaction};
use chrono::{Local, NaiveDate};
use clap::{Args, Subcommand};
use uuid::Uuid;

use super::{parse_amount, queue_changes, OutputFormat};

#[derive(Args)]
pub struct TxnCommand {
    #[command(subcommand)]
    pub command: TxnSubcommand,
}

#[derive(Subcommand)]
pub enum TxnSubcommand {
    /// Record a transaction
    Add {
        /// Account ID
        #[arg(long)]
        account: Uuid,

        /// Amount; negative for outflows (e.g. -42.10)
        #[arg(allow_hyphen_values = true)]
        amount: String,

        /// Date (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Payee ID
        #[arg(long)]
        payee: Option<Uuid>,

        /// Category
        #[arg(long)]
        category: Option<String>,

        /// Memo
        #[arg(long)]
        memo: Option<String>,

        /// Mark as cleared by the bank
        #[arg(long)]
        cleared: bool,
    },

    /// Remove a transaction
    Remove {
        /// Transaction ID
        id: Uuid,
    },

    /// List transactions, newest date first
    List {
        /// Only this account's transactions
        #[arg(long)]
        account: Option<Uuid>,

        /// Output format
        #[arg(long, short, value_enum, default_value = "text")]
        format: OutputFormat,
    },
}

impl TxnCommand {
    pub fn run(&self, engine: &SyncOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
        let transactions = engine.writer::<Transaction>();

        match &self.command {
            TxnSubcommand::Add {
                account,
                amount,
                date,
                payee,
                category,
                memo,
                cleared,
            } => {
                if engine.writer::<Account>().get(*account)?.is_none_or(|a| a.tombstone) {
                    return Err(format!("Account not found: {}", account).into());
                }

                let date = date.unwrap_or_else(|| Local::now().date_naive());
                let mut txn = Transaction::new(*account, date, parse_amount(amount)?);
                if let Some(payee) = payee {
                    if engine.writer::<Payee>().get(*payee)?.is_none_or(|p| p.tombstone) {
                        return Err(format!("Payee not found: {}", payee).into());
                    }
                    txn = txn.with_payee(*payee);
                }
                if let Some(category) = category {
                    txn = txn.with_category(category);
                }
                if let Some(memo) = memo {
                    txn = txn.with_memo(memo);
                }
                txn.cleared = *cleared;

                let created = transactions.create(txn)?;
                println!("Recorded transaction {}", created.id);
                println!("  {}", created.payload);
                queue_changes(engine)
            }

            TxnSubcommand::Remove { id } => {
                transactions.delete(*id)?;
                println!("Removed transaction {}", id);
                queue_changes(engine)
            }

            TxnSubcommand::List { account, format } => {
                let mut list = transactions.list()?;
                if let Some(account) = account {
                    list.retain(|t| t.payload.account_id == *account);
                }
                list.sort_by(|a, b| b.payload.date.cmp(&a.payload.date));

                match format {
                    OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&list)?),
                    OutputFormat::Text => {
                        if list.is_empty() {
                            println!("No transactions found.");
                        }
                        for record in &list {
                            let cleared = if record.payload.cleared { "c" } else { " " };
                            println!("{} {}  {}", cleared, record.id, record.payload);
                        }
                    }
                }
                Ok(())
            }
        }
    }
}
