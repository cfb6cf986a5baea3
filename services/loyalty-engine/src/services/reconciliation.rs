//! Refreshes order status and accrual from the external accrual service.
//!
//! Two entry points share the same per-order step: the on-demand view used
//! when a user lists orders, and the background pass over all pending
//! orders. Both stop at the first rate-limit answer.

use crate::accrual_client::AccrualClient;
use crate::database::LedgerStore;
use crate::errors::{LoyaltyError, Result};
use crate::metrics;
use crate::models::{round_points, Order, OrderStatus, UserId};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

pub struct ReconciliationService {
    store: Arc<dyn LedgerStore>,
    accrual: Arc<dyn AccrualClient>,
}

/// Outcome of one background pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub checked: usize,
    pub updated: usize,
    /// Set when the pass was cut short by the accrual service rate limit.
    pub retry_after: Option<Duration>,
}

impl ReconciliationService {
    pub fn new(store: Arc<dyn LedgerStore>, accrual: Arc<dyn AccrualClient>) -> Self {
        ReconciliationService { store, accrual }
    }

    /// Query the accrual service for one order and persist a fresher status.
    async fn refresh(&self, order: &mut Order) -> Result<bool> {
        let response = self.accrual.get_order_accrual(&order.number).await?;
        let status = OrderStatus::from(response.status);
        let accrual = response.credited_amount().map(round_points);

        let updated = self.store.apply_accrual(&order.number, status, accrual).await?;
        if updated {
            metrics::ORDERS_RECONCILED.inc();
            info!("Order {} is now {}", order.number, status);
            order.status = status;
            order.accrual = accrual;
        }
        Ok(updated)
    }

    /// Orders of a user with live accrual status, newest first.
    ///
    /// Stops at the first `TooManyRequests` and returns it so the transport
    /// layer can relay the retry delay. Other accrual failures keep the
    /// stored status for that order.
    pub async fn user_orders(&self, user_id: UserId) -> Result<Vec<Order>> {
        let mut orders = self.store.orders_for_user(user_id).await?;

        for order in orders.iter_mut().filter(|o| !o.status.is_terminal()) {
            match self.refresh(order).await {
                Ok(_) => {}
                Err(e @ LoyaltyError::TooManyRequests { .. }) => return Err(e),
                Err(LoyaltyError::AccrualService(msg)) => {
                    warn!("Keeping stored status for order {}: {}", order.number, msg);
                }
                Err(e) => return Err(e),
            }
        }

        Ok(orders)
    }

    /// One pass over up to `batch_size` pending orders, oldest first.
    pub async fn reconcile_pending(&self, batch_size: i64) -> Result<ReconcileReport> {
        let orders = self.store.pending_orders(batch_size).await?;
        let mut report = ReconcileReport::default();

        for mut order in orders {
            match self.refresh(&mut order).await {
                Ok(updated) => {
                    report.checked += 1;
                    if updated {
                        report.updated += 1;
                    }
                }
                Err(LoyaltyError::TooManyRequests { retry_after }) => {
                    report.retry_after = Some(retry_after);
                    break;
                }
                Err(LoyaltyError::AccrualService(msg)) => {
                    report.checked += 1;
                    warn!("Accrual lookup failed for order {}: {}", order.number, msg);
                }
                Err(e) => return Err(e),
            }
        }

        debug!(
            "Reconciliation pass checked {} orders, updated {}",
            report.checked, report.updated
        );
        Ok(report)
    }

    /// Background loop: a pass every `interval`, or after the advised delay
    /// when the accrual service asked us to back off.
    pub async fn run(self: Arc<Self>, interval: Duration, batch_size: i64, shutdown: CancellationToken) {
        info!(
            "Background reconciler started (interval {}s, batch {})",
            interval.as_secs(),
            batch_size
        );

        loop {
            let delay = tokio::select! {
                _ = shutdown.cancelled() => break,
                result = self.reconcile_pending(batch_size) => match result {
                    Ok(report) => report.retry_after.unwrap_or(interval),
                    Err(e) => {
                        error!("Reconciliation pass failed: {}", e);
                        interval
                    }
                },
            };

            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        info!("Background reconciler stopped");
    }
}
