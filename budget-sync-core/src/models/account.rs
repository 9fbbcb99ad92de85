use serde::{Deserialize, Serialize};
use std::fmt;

use super::{DataType, Syncable};

/// Kind of ledger account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    #[default]
    Checking,
    Savings,
    Credit,
    Cash,
    Investment,
}

impl fmt::Display for AccountKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AccountKind::Checking => "checking",
            AccountKind::Savings => "savings",
            AccountKind::Credit => "credit",
            AccountKind::Cash => "cash",
            AccountKind::Investment => "investment",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for AccountKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "checking" => Ok(AccountKind::Checking),
            "savings" => Ok(AccountKind::Savings),
            "credit" => Ok(AccountKind::Credit),
            "cash" => Ok(AccountKind::Cash),
            "investment" => Ok(AccountKind::Investment),
            other => Err(format!("unknown account kind: {}", other)),
        }
    }
}

/// A ledger account (bank account, card, wallet).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub name: String,
    #[serde(default)]
    pub kind: AccountKind,
    /// ISO 4217 currency code
    pub currency: String,
    /// Opening balance in minor units (cents)
    #[serde(default)]
    pub opening_balance: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl Account {
    pub fn new(name: impl Into<String>, currency: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: AccountKind::default(),
            currency: currency.into(),
            opening_balance: 0,
            notes: None,
        }
    }

    pub fn with_kind(mut self, kind: AccountKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_opening_balance(mut self, cents: i64) -> Self {
        self.opening_balance = cents;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

impl Syncable for Account {
    const DATA_TYPE: DataType = DataType::Account;
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.opening_balance < 0 { "-" } else { "" };
        write!(
            f,
            "{} ({}, {}) opening {}{}.{:02}",
            self.name,
            self.kind,
            self.currency,
            sign,
            self.opening_balance.abs() / 100,
            self.opening_balance.abs() % 100
        )
    }
}
