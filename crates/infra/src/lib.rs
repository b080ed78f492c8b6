//! Infrastructure layer: ledger persistence, per-kind locking, the ledger
//! service, the project directory and configuration.

pub mod config;
pub mod ledger;
pub mod locks;
pub mod projects;
pub mod store;

pub use config::{default_kinds, LedgerConfig};
pub use ledger::{CheckinReceipt, CheckoutReceipt, HardwareLedger, Holding, LedgerError};
pub use projects::{
    AnyProjectDirectory, DirectoryError, InMemoryProjectDirectory, MembershipError, SqliteProjectDirectory,
};
pub use store::{AnyLedgerStore, InMemoryLedgerStore, LedgerCommit, LedgerStore, SqliteLedgerStore, StoreError};
