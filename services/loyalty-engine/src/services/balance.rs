use crate::database::LedgerStore;
use crate::errors::{LoyaltyError, Result};
use crate::luhn::is_order_shaped;
use crate::metrics;
use crate::models::{fits_points_scale, LedgerAccount, UserId, Withdrawal};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

pub struct BalanceService {
    store: Arc<dyn LedgerStore>,
}

impl BalanceService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        BalanceService { store }
    }

    /// Current and withdrawn totals. A missing account reads as zeros.
    pub async fn get_balance(&self, user_id: UserId) -> Result<LedgerAccount> {
        self.store.balance(user_id).await
    }

    /// Spend `amount` points against the one-shot `reference`.
    ///
    /// Returns the balance left after the debit. Duplicate references and
    /// malformed input (including sub-hundredth amounts) are `InvalidOrder`;
    /// the balance is untouched on any error.
    pub async fn withdraw(&self, user_id: UserId, reference: &str, amount: Decimal) -> Result<Decimal> {
        if amount <= Decimal::ZERO {
            metrics::WITHDRAWALS.with_label_values(&["invalid"]).inc();
            return Err(LoyaltyError::InvalidOrder(format!(
                "withdrawal amount must be positive, got {}",
                amount
            )));
        }
        if !fits_points_scale(amount) {
            metrics::WITHDRAWALS.with_label_values(&["invalid"]).inc();
            return Err(LoyaltyError::InvalidOrder(format!(
                "withdrawal amount {} has more than two decimal places",
                amount
            )));
        }
        if !is_order_shaped(reference) {
            metrics::WITHDRAWALS.with_label_values(&["invalid"]).inc();
            return Err(LoyaltyError::InvalidOrder(reference.to_string()));
        }

        match self.store.withdraw(user_id, reference, amount).await {
            Ok(balance) => {
                metrics::WITHDRAWALS.with_label_values(&["ok"]).inc();
                info!(
                    "User {} withdrew {} against {}, balance {}",
                    user_id, amount, reference, balance
                );
                Ok(balance)
            }
            Err(LoyaltyError::InsufficientFunds) => {
                metrics::WITHDRAWALS.with_label_values(&["insufficient_funds"]).inc();
                Err(LoyaltyError::InsufficientFunds)
            }
            Err(e @ LoyaltyError::InvalidOrder(_)) => {
                metrics::WITHDRAWALS.with_label_values(&["duplicate"]).inc();
                warn!("Rejected withdrawal for user {}: {}", user_id, e);
                Err(e)
            }
            Err(e) => {
                metrics::WITHDRAWALS.with_label_values(&["error"]).inc();
                Err(e)
            }
        }
    }

    pub async fn get_withdrawals(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        self.store.withdrawals_for_user(user_id).await
    }
}
