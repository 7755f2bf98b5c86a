//! Business logic services for the produce ledger

pub mod auth;
pub mod ledger;
pub mod ledger_store;
pub mod reporting;

pub use auth::AuthService;
pub use ledger::LedgerService;
pub use ledger_store::LedgerStore;
pub use reporting::ReportingService;
