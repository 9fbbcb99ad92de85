mod account;
mod data_type;
mod payee;
mod record;
mod transaction;

pub use account::{Account, AccountKind};
pub use data_type::DataType;
pub use payee::Payee;
pub use record::{SyncRecord, Syncable, VersionedRecord};
pub use transaction::Transaction;
