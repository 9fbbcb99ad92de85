mod account;
mod config_cmd;
mod device;
mod payee;
mod sync_cmd;
mod txn;

pub use account::AccountCommand;
pub use config_cmd::ConfigCommand;
pub use device::DeviceCommand;
pub use payee::PayeeCommand;
pub use sync_cmd::SyncCommand;
pub use txn::TxnCommand;

use budget_sync_core::SyncOrchestrator;
use clap::ValueEnum;

#[derive(Clone, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Seals the changes made by a command into one queued batch.
fn queue_changes(engine: &SyncOrchestrator) -> Result<(), Box<dyn std::error::Error>> {
    if let Some(batch) = engine.flush()? {
        println!("Queued batch {} ({} change(s) pending).", batch, engine.state().pending_changes);
        println!("Run 'budgetsync sync' to upload.");
    }
    Ok(())
}

/// Parses a decimal amount such as `-12.5` into cents.
fn parse_amount(s: &str) -> Result<i64, String> {
    let s = s.trim();
    let (negative, digits) = match s.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, s),
    };
    let (whole, fraction) = digits.split_once('.').unwrap_or((digits, ""));

    let invalid = || format!("invalid amount '{}'", s);
    if whole.is_empty() && fraction.is_empty() {
        return Err(invalid());
    }
    if fraction.len() > 2 || !whole.chars().chain(fraction.chars()).all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }

    let whole: i64 = if whole.is_empty() {
        0
    } else {
        whole.parse().map_err(|_| invalid())?
    };
    let cents: i64 = format!("{:0<2}", fraction).parse().map_err(|_| invalid())?;
    let total = whole
        .checked_mul(100)
        .and_then(|w| w.checked_add(cents))
        .ok_or_else(invalid)?;

    Ok(if negative { -total } else { total })
}

fn format_amount(cents: i64) -> String {
    let sign = if cents < 0 { "-" } else { "" };
    format!("{}{}.{:02}", sign, cents.abs() / 100, cents.abs() % 100)
}
