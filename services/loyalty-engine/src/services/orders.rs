use crate::database::LedgerStore;
use crate::errors::{LoyaltyError, Result};
use crate::luhn::check_luhn;
use crate::metrics;
use crate::models::{UploadOutcome, UserId};
use std::sync::Arc;
use tracing::{info, warn};

/// Order admission: validation, ownership checks and persistence.
pub struct OrderService {
    store: Arc<dyn LedgerStore>,
}

impl OrderService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        OrderService { store }
    }

    /// Upload an order number on behalf of `user_id`.
    ///
    /// Uniqueness is enforced by the store. When a concurrent upload wins the
    /// insert, the loser re-reads the owner and resolves as a duplicate.
    pub async fn upload_order(&self, user_id: UserId, number: &str) -> Result<UploadOutcome> {
        if !check_luhn(number) {
            metrics::ORDERS_UPLOADED.with_label_values(&["invalid"]).inc();
            return Err(LoyaltyError::InvalidOrder(number.to_string()));
        }

        if let Some(owner) = self.store.find_order_owner(number).await? {
            return Self::resolve_existing(user_id, owner, number);
        }

        if self.store.insert_order(user_id, number).await? {
            metrics::ORDERS_UPLOADED.with_label_values(&["accepted"]).inc();
            info!("Order {} uploaded by user {}", number, user_id);
            return Ok(UploadOutcome::Accepted);
        }

        warn!("Lost insert race for order {}, re-reading owner", number);
        let owner = self.store.find_order_owner(number).await?.ok_or_else(|| {
            LoyaltyError::Internal(format!("order {} missing after conflicting insert", number))
        })?;
        Self::resolve_existing(user_id, owner, number)
    }

    fn resolve_existing(user_id: UserId, owner: UserId, number: &str) -> Result<UploadOutcome> {
        if owner == user_id {
            metrics::ORDERS_UPLOADED.with_label_values(&["duplicate_self"]).inc();
            Ok(UploadOutcome::AlreadyUploaded)
        } else {
            metrics::ORDERS_UPLOADED.with_label_values(&["conflict"]).inc();
            Err(LoyaltyError::AlreadyUploadedByOther(number.to_string()))
        }
    }
}
