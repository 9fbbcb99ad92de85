//! Record kinds known to the sync engine.

use serde::{Deserialize, Serialize};

/// Kind of domain record carried by a versioned record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataType {
    Account,
    Transaction,
    Budget,
    Payee,
    Category,
    Reconciliation,
}

impl DataType {
    pub const ALL: [DataType; 6] = [
        DataType::Account,
        DataType::Transaction,
        DataType::Budget,
        DataType::Payee,
        DataType::Category,
        DataType::Reconciliation,
    ];

    /// Stable lowercase name used in file names and on the wire.
    pub fn name(&self) -> &'static str {
        match self {
            DataType::Account => "account",
            DataType::Transaction => "transaction",
            DataType::Budget => "budget",
            DataType::Payee => "payee",
            DataType::Category => "category",
            DataType::Reconciliation => "reconciliation",
        }
    }

    /// Returns the filename for this record kind in the local record store.
    pub fn filename(&self) -> String {
        format!("{}s.json", self.name())
    }

    /// Parse from string name.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.to_lowercase();
        let s = s.strip_suffix('s').unwrap_or(&s);
        Self::ALL.into_iter().find(|t| t.name() == s)
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
