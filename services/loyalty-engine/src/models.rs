use chrono::{DateTime, Utc};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Opaque identifier handed over by the identity provider.
pub type UserId = Uuid;

/// Ledger amounts are kept to hundredths of a point.
pub const POINTS_SCALE: u32 = 2;

/// Rounds an accrual to ledger precision, half away from zero.
pub fn round_points(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(POINTS_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// True when `amount` can be debited without rounding.
pub fn fits_points_scale(amount: Decimal) -> bool {
    amount.normalize().scale() <= POINTS_SCALE
}

/// Order lifecycle: `NEW -> PROCESSING -> PROCESSED | INVALID`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    New,
    Processing,
    Processed,
    Invalid,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::New => "NEW",
            OrderStatus::Processing => "PROCESSING",
            OrderStatus::Processed => "PROCESSED",
            OrderStatus::Invalid => "INVALID",
        }
    }

    /// Terminal orders are never reconciled again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Processed | OrderStatus::Invalid)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "PROCESSING" => Ok(OrderStatus::Processing),
            "PROCESSED" => Ok(OrderStatus::Processed),
            "INVALID" => Ok(OrderStatus::Invalid),
            other => Err(format!("unknown order status: {}", other)),
        }
    }
}

/// An uploaded purchase order, permanently bound to its first uploader.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    pub number: String,
    #[serde(skip)]
    pub user_id: UserId,
    pub status: OrderStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
    pub uploaded_at: DateTime<Utc>,
}

/// Status reported by the external accrual service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AccrualStatus {
    Registered,
    Processing,
    Processed,
    Invalid,
}

impl From<AccrualStatus> for OrderStatus {
    fn from(status: AccrualStatus) -> Self {
        match status {
            AccrualStatus::Registered | AccrualStatus::Processing => OrderStatus::Processing,
            AccrualStatus::Processed => OrderStatus::Processed,
            AccrualStatus::Invalid => OrderStatus::Invalid,
        }
    }
}

/// Accrual service payload for `GET /api/orders/{number}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccrualResponse {
    pub order: String,
    pub status: AccrualStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accrual: Option<Decimal>,
}

impl AccrualResponse {
    pub fn processing(order: &str) -> Self {
        AccrualResponse {
            order: order.to_string(),
            status: AccrualStatus::Processing,
            accrual: None,
        }
    }

    pub fn invalid(order: &str) -> Self {
        AccrualResponse {
            order: order.to_string(),
            status: AccrualStatus::Invalid,
            accrual: None,
        }
    }

    /// Accrual is only meaningful once the order is processed.
    pub fn credited_amount(&self) -> Option<Decimal> {
        match self.status {
            AccrualStatus::Processed => self.accrual,
            _ => None,
        }
    }
}

/// Per-user spendable balance and cumulative withdrawals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub user_id: UserId,
    pub current_balance: Decimal,
    pub withdrawn_total: Decimal,
}

impl LedgerAccount {
    pub fn empty(user_id: UserId) -> Self {
        LedgerAccount {
            user_id,
            current_balance: Decimal::ZERO,
            withdrawn_total: Decimal::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceResponse {
    pub current: Decimal,
    pub withdrawn: Decimal,
}

impl From<LedgerAccount> for BalanceResponse {
    fn from(account: LedgerAccount) -> Self {
        BalanceResponse {
            current: account.current_balance,
            withdrawn: account.withdrawn_total,
        }
    }
}

/// A debit against a ledger account. `reference` is order-shaped and only
/// used as a uniqueness token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Withdrawal {
    #[serde(rename = "order")]
    pub reference: String,
    #[serde(skip)]
    pub user_id: UserId,
    #[serde(rename = "sum")]
    pub amount: Decimal,
    pub processed_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WithdrawRequest {
    pub order: String,
    pub sum: Decimal,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct WithdrawResponse {
    pub current: Decimal,
}

/// Successful outcomes of an order upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    /// First upload; the order is stored as `NEW`.
    Accepted,
    /// The same user uploaded this number before. Idempotent success.
    AlreadyUploaded,
}
