pub mod balance;
pub mod orders;
pub mod reconciliation;

pub use balance::BalanceService;
pub use orders::OrderService;
pub use reconciliation::{ReconcileReport, ReconciliationService};
