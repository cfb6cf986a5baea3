use super::LedgerStore;
use crate::errors::{LoyaltyError, Result};
use crate::models::{
    fits_points_scale, round_points, LedgerAccount, Order, OrderStatus, UserId, Withdrawal,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::Mutex;

/// Ledger store kept in process memory.
///
/// A single lock guards all records and every operation runs its
/// check-then-write sequence without awaiting in between, so operations are
/// atomic and a cancelled caller never leaves a partial mutation behind.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    orders: HashMap<String, Order>,
    // Upload order, used for newest/oldest-first listings.
    order_log: Vec<String>,
    accounts: HashMap<UserId, LedgerAccount>,
    withdrawals: Vec<Withdrawal>,
    used_references: HashSet<String>,
}

impl State {
    fn account_mut(&mut self, user_id: UserId) -> &mut LedgerAccount {
        self.accounts
            .entry(user_id)
            .or_insert_with(|| LedgerAccount::empty(user_id))
    }
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn find_order_owner(&self, number: &str) -> Result<Option<UserId>> {
        let state = self.state.lock().await;
        Ok(state.orders.get(number).map(|order| order.user_id))
    }

    async fn insert_order(&self, user_id: UserId, number: &str) -> Result<bool> {
        let mut state = self.state.lock().await;
        if state.orders.contains_key(number) {
            return Ok(false);
        }

        state.orders.insert(
            number.to_string(),
            Order {
                number: number.to_string(),
                user_id,
                status: OrderStatus::New,
                accrual: None,
                uploaded_at: Utc::now(),
            },
        );
        state.order_log.push(number.to_string());
        Ok(true)
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        Ok(state
            .order_log
            .iter()
            .rev()
            .filter_map(|number| state.orders.get(number))
            .filter(|order| order.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn pending_orders(&self, limit: i64) -> Result<Vec<Order>> {
        let state = self.state.lock().await;
        let limit = usize::try_from(limit).unwrap_or(0);
        Ok(state
            .order_log
            .iter()
            .filter_map(|number| state.orders.get(number))
            .filter(|order| !order.status.is_terminal())
            .take(limit)
            .cloned()
            .collect())
    }

    async fn apply_accrual(
        &self,
        number: &str,
        status: OrderStatus,
        accrual: Option<Decimal>,
    ) -> Result<bool> {
        if status == OrderStatus::New {
            return Ok(false);
        }
        let accrual = match status {
            OrderStatus::Processed => accrual.map(round_points),
            _ => None,
        };

        let mut state = self.state.lock().await;
        let Some(order) = state.orders.get_mut(number) else {
            return Ok(false);
        };
        if order.status.is_terminal() || (order.status == status && order.accrual == accrual) {
            return Ok(false);
        }

        order.status = status;
        order.accrual = accrual;
        let user_id = order.user_id;

        if let Some(amount) = accrual.filter(|a| *a > Decimal::ZERO) {
            state.account_mut(user_id).current_balance += amount;
        }
        Ok(true)
    }

    async fn balance(&self, user_id: UserId) -> Result<LedgerAccount> {
        let mut state = self.state.lock().await;
        Ok(state.account_mut(user_id).clone())
    }

    async fn withdraw(&self, user_id: UserId, reference: &str, amount: Decimal) -> Result<Decimal> {
        if !fits_points_scale(amount) {
            return Err(LoyaltyError::InvalidOrder(format!(
                "withdrawal amount {} is finer than the ledger precision",
                amount
            )));
        }

        let mut state = self.state.lock().await;

        if state.used_references.contains(reference) {
            return Err(LoyaltyError::InvalidOrder(format!(
                "withdrawal reference {} already used",
                reference
            )));
        }

        let account = state.account_mut(user_id);
        if amount > account.current_balance {
            return Err(LoyaltyError::InsufficientFunds);
        }
        account.current_balance -= amount;
        account.withdrawn_total += amount;
        let new_balance = account.current_balance;

        state.used_references.insert(reference.to_string());
        state.withdrawals.push(Withdrawal {
            reference: reference.to_string(),
            user_id,
            amount,
            processed_at: Utc::now(),
        });

        Ok(new_balance)
    }

    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let state = self.state.lock().await;
        Ok(state
            .withdrawals
            .iter()
            .rev()
            .filter(|w| w.user_id == user_id)
            .cloned()
            .collect())
    }
}
