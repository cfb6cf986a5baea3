use super::LedgerStore;
use crate::errors::{LoyaltyError, Result};
use crate::models::{
    fits_points_scale, round_points, LedgerAccount, Order, OrderStatus, UserId, Withdrawal,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgPoolOptions;
use sqlx::{FromRow, Pool, Postgres};
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub struct PgLedgerStore {
    pool: Pool<Postgres>,
}

#[derive(Debug, FromRow)]
struct OrderRow {
    number: String,
    user_id: Uuid,
    status: String,
    accrual: Option<Decimal>,
    uploaded_at: DateTime<Utc>,
}

impl TryFrom<OrderRow> for Order {
    type Error = LoyaltyError;

    fn try_from(row: OrderRow) -> Result<Self> {
        let status = row.status.parse::<OrderStatus>().map_err(LoyaltyError::Internal)?;

        Ok(Order {
            number: row.number,
            user_id: row.user_id,
            status,
            accrual: row.accrual,
            uploaded_at: row.uploaded_at,
        })
    }
}

#[derive(Debug, FromRow)]
struct AccountRow {
    user_id: Uuid,
    current_balance: Decimal,
    withdrawn_total: Decimal,
}

#[derive(Debug, FromRow)]
struct WithdrawalRow {
    reference: String,
    user_id: Uuid,
    amount: Decimal,
    processed_at: DateTime<Utc>,
}

impl PgLedgerStore {
    pub async fn new(
        database_url: &str,
        max_connections: u32,
        min_connections: u32,
        acquire_timeout: Duration,
    ) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .min_connections(min_connections)
            .acquire_timeout(acquire_timeout)
            .connect(database_url)
            .await?;

        Ok(PgLedgerStore { pool })
    }

    /// Applies the bundled schema migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("Database migrations applied");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn find_order_owner(&self, number: &str) -> Result<Option<UserId>> {
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            SELECT user_id FROM orders WHERE number = $1
            "#,
        )
        .bind(number)
        .fetch_optional(&self.pool)
        .await?;

        Ok(owner)
    }

    async fn insert_order(&self, user_id: UserId, number: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO orders (number, user_id, status, uploaded_at)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (number) DO NOTHING
            "#,
        )
        .bind(number)
        .bind(user_id)
        .bind(OrderStatus::New.as_str())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn orders_for_user(&self, user_id: UserId) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE user_id = $1
            ORDER BY uploaded_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
    }

    async fn pending_orders(&self, limit: i64) -> Result<Vec<Order>> {
        let rows = sqlx::query_as::<_, OrderRow>(
            r#"
            SELECT number, user_id, status, accrual, uploaded_at
            FROM orders
            WHERE status NOT IN ('PROCESSED', 'INVALID')
            ORDER BY uploaded_at ASC
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Order::try_from).collect()
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

        let mut tx = self.pool.begin().await?;

        // The row lock taken here makes racing reconcilers re-check the
        // terminal guard after the winner commits.
        let owner = sqlx::query_scalar::<_, Uuid>(
            r#"
            UPDATE orders
            SET status = $2, accrual = $3
            WHERE number = $1
              AND status NOT IN ('PROCESSED', 'INVALID')
              AND (status <> $2 OR accrual IS DISTINCT FROM $3)
            RETURNING user_id
            "#,
        )
        .bind(number)
        .bind(status.as_str())
        .bind(accrual)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(user_id) = owner else {
            return Ok(false);
        };

        if let Some(amount) = accrual.filter(|a| *a > Decimal::ZERO) {
            sqlx::query(
                r#"
                INSERT INTO ledger_accounts (user_id, current_balance, withdrawn_total)
                VALUES ($1, $2, 0)
                ON CONFLICT (user_id)
                DO UPDATE SET current_balance = ledger_accounts.current_balance + EXCLUDED.current_balance
                "#,
            )
            .bind(user_id)
            .bind(amount)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        debug!("Order {} moved to {}", number, status);
        Ok(true)
    }

    async fn balance(&self, user_id: UserId) -> Result<LedgerAccount> {
        sqlx::query(
            r#"
            INSERT INTO ledger_accounts (user_id, current_balance, withdrawn_total)
            VALUES ($1, 0, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&self.pool)
        .await?;

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT user_id, current_balance, withdrawn_total
            FROM ledger_accounts
            WHERE user_id = $1
            "#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerAccount {
            user_id: row.user_id,
            current_balance: row.current_balance,
            withdrawn_total: row.withdrawn_total,
        })
    }

    async fn withdraw(&self, user_id: UserId, reference: &str, amount: Decimal) -> Result<Decimal> {
        // NUMERIC(14, 2) would round the debit and the withdrawn total apart.
        if !fits_points_scale(amount) {
            return Err(LoyaltyError::InvalidOrder(format!(
                "withdrawal amount {} is finer than the ledger precision",
                amount
            )));
        }

        // Any early return drops `tx`, which rolls the transaction back.
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO ledger_accounts (user_id, current_balance, withdrawn_total)
            VALUES ($1, 0, 0)
            ON CONFLICT (user_id) DO NOTHING
            "#,
        )
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        // Account lock first: concurrent withdrawals for this user queue here.
        let current = sqlx::query_scalar::<_, Decimal>(
            r#"
            SELECT current_balance
            FROM ledger_accounts
            WHERE user_id = $1
            FOR UPDATE
            "#,
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let used = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (SELECT 1 FROM withdrawals WHERE reference = $1)
            "#,
        )
        .bind(reference)
        .fetch_one(&mut *tx)
        .await?;

        if used {
            return Err(LoyaltyError::InvalidOrder(format!(
                "withdrawal reference {} already used",
                reference
            )));
        }

        if amount > current {
            return Err(LoyaltyError::InsufficientFunds);
        }

        let new_balance = sqlx::query_scalar::<_, Decimal>(
            r#"
            UPDATE ledger_accounts
            SET current_balance = current_balance - $1,
                withdrawn_total = withdrawn_total + $1
            WHERE user_id = $2
            RETURNING current_balance
            "#,
        )
        .bind(amount)
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        // Another account may have claimed the same reference concurrently;
        // the unique constraint settles it.
        sqlx::query(
            r#"
            INSERT INTO withdrawals (reference, user_id, amount, processed_at)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(reference)
        .bind(user_id)
        .bind(amount)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await
        .map_err(|e| match e {
            sqlx::Error::Database(ref db) if db.is_unique_violation() => LoyaltyError::InvalidOrder(
                format!("withdrawal reference {} already used", reference),
            ),
            other => LoyaltyError::Database(other),
        })?;

        tx.commit().await?;

        Ok(new_balance)
    }

    async fn withdrawals_for_user(&self, user_id: UserId) -> Result<Vec<Withdrawal>> {
        let rows = sqlx::query_as::<_, WithdrawalRow>(
            r#"
            SELECT reference, user_id, amount, processed_at
            FROM withdrawals
            WHERE user_id = $1
            ORDER BY processed_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| Withdrawal {
                reference: row.reference,
                user_id: row.user_id,
                amount: row.amount,
                processed_at: row.processed_at,
            })
            .collect())
    }
}
