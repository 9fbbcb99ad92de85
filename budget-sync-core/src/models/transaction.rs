use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use super::{DataType, Syncable};

/// A single ledger entry against an account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub account_id: Uuid,
    pub date: NaiveDate,
    /// Signed amount in minor units; negative is an outflow
    pub amount: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payee_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memo: Option<String>,
    #[serde(default)]
    pub cleared: bool,
}

impl Transaction {
    pub fn new(account_id: Uuid, date: NaiveDate, amount: i64) -> Self {
        Self {
            account_id,
            date,
            amount,
            payee_id: None,
            category: None,
            memo: None,
            cleared: false,
        }
    }

    pub fn with_payee(mut self, payee_id: Uuid) -> Self {
        self.payee_id = Some(payee_id);
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

impl Syncable for Transaction {
    const DATA_TYPE: DataType = DataType::Transaction;
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.amount < 0 { "-" } else { "" };
        write!(
            f,
            "{} {}{}.{:02}",
            self.date,
            sign,
            self.amount.abs() / 100,
            self.amount.abs() % 100
        )?;
        if let Some(category) = &self.category {
            write!(f, " [{}]", category)?;
        }
        if let Some(memo) = &self.memo {
            write!(f, " {}", memo)?;
        }
        Ok(())
    }
}
