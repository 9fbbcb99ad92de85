use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{DataType, Syncable};

/// Someone money is paid to or received from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payee {
    pub name: String,
    /// Category suggested when a transaction is entered for this payee
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_category: Option<String>,
    /// Account this payee represents when it is a transfer target
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_account: Option<Uuid>,
}

impl Payee {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            default_category: None,
            transfer_account: None,
        }
    }

    pub fn with_default_category(mut self, category: impl Into<String>) -> Self {
        self.default_category = Some(category.into());
        self
    }
}

impl Syncable for Payee {
    const DATA_TYPE: DataType = DataType::Payee;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payee_with_category() {
        let payee = Payee::new("Grocer").with_default_category("food");
        assert_eq!(payee.default_category.as_deref(), Some("food"));
        assert!(payee.transfer_account.is_none());
    }
}
