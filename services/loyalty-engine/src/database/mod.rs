//! Durable ledger records: orders, ledger accounts and withdrawals.
//!
//! Services only see [`LedgerStore`]. [`PgLedgerStore`] is the production
//! backend; [`InMemoryLedgerStore`] backs tests and local runs.

pub mod memory;
pub mod postgres;

use crate::errors::Result;
use crate::models::{LedgerAccount, Order, OrderStatus, UserId, Withdrawal};
use async_trait::async_trait;
use rust_decimal::Decimal;

pub use memory::InMemoryLedgerStore;
pub use postgres::PgLedgerStore;

#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Owner of an already uploaded order number, if any.
    async fn find_order_owner(&self, number: &str) -> Result<Option<UserId>>;

    /// Stores a `NEW` order. Returns `false` when the number already exists,
    /// which is how a lost insert race is reported.
    async fn insert_order(&self, user_id: UserId, number: &str) -> Result<bool>;

    /// All orders of a user, newest upload first.
    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>>;

    /// Non-terminal orders across all users, oldest upload first.
    async fn pending_orders(&self, limit: i64) -> Result<Vec<Order>>;

    /// Moves a non-terminal order to `status`. Reaching `PROCESSED` with a
    /// positive accrual credits the owner's account in the same transaction.
    /// The accrual is rounded to hundredths before it is stored or credited.
    /// Returns `false` if the order is unknown, terminal, or unchanged.
    async fn apply_accrual(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool>;

    /// Ledger account of a user, created at zero when absent.
    async fn balance(&self, user_id: UserId) -> Result<LedgerAccount>;

    /// Debits `amount` and records the withdrawal atomically, serialized per
    /// account. Returns the new balance. Amounts finer than hundredths are
    /// rejected with `InvalidOrder`.
    async fn withdraw(&self, user_id: UserId, reference: &str, amount: Decimal) -> Result<Decimal>;

    /// All withdrawals of a user, most recent first.
    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>>;
}
