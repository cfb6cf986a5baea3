use actix_web::{error::ResponseError, http::header, http::StatusCode, HttpResponse};
use serde_json::json;
use std::time::Duration;
use thiserror::Error;
use tracing::error;

pub type Result<T> = std::result::Result<T, LoyaltyError>;

#[derive(Error, Debug)]
pub enum LoyaltyError {
    #[error("Invalid order number: {0}")]
    InvalidOrder(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    #[error("Order {0} has already been uploaded by another user")]
    AlreadyUploadedByOther(String),

    #[error("Accrual service rate limit exceeded, retry after {}s", .retry_after.as_secs())]
    TooManyRequests { retry_after: Duration },

    #[error("Accrual service error: {0}")]
    AccrualService(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl LoyaltyError {
    /// Failures whose detail must stay inside the service.
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            LoyaltyError::AccrualService(_)
                | LoyaltyError::Database(_)
                | LoyaltyError::Migration(_)
                | LoyaltyError::Internal(_)
        )
    }

    fn error_type(&self) -> &str {
        match self {
            LoyaltyError::InvalidOrder(_) => "invalid_order",
            LoyaltyError::InsufficientFunds => "insufficient_funds",
            LoyaltyError::AlreadyUploadedByOther(_) => "order_conflict",
            LoyaltyError::TooManyRequests { .. } => "rate_limit",
            LoyaltyError::AccrualService(_) => "internal_error",
            LoyaltyError::Database(_) => "internal_error",
            LoyaltyError::Migration(_) => "internal_error",
            LoyaltyError::Unauthorized => "unauthorized",
            LoyaltyError::Internal(_) => "internal_error",
        }
    }
}

impl ResponseError for LoyaltyError {
    fn error_response(&self) -> HttpResponse {
        let status_code = self.status_code();

        let message = if self.is_internal() {
            error!("Request failed: {}", self);
            "internal server error".to_string()
        } else {
            self.to_string()
        };

        let mut builder = HttpResponse::build(status_code);
        if let LoyaltyError::TooManyRequests { retry_after } = self {
            builder.insert_header((header::RETRY_AFTER, retry_after.as_secs().to_string()));
        }

        builder.json(json!({
            "error": {
                "code": status_code.as_u16(),
                "message": message,
                "type": self.error_type()
            }
        }))
    }

    fn status_code(&self) -> StatusCode {
        match self {
            LoyaltyError::InvalidOrder(_) => StatusCode::UNPROCESSABLE_ENTITY,
            LoyaltyError::InsufficientFunds => StatusCode::PAYMENT_REQUIRED,
            LoyaltyError::AlreadyUploadedByOther(_) => StatusCode::CONFLICT,
            LoyaltyError::TooManyRequests { .. } => StatusCode::TOO_MANY_REQUESTS,
            LoyaltyError::AccrualService(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LoyaltyError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LoyaltyError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            LoyaltyError::Unauthorized => StatusCode::UNAUTHORIZED,
            LoyaltyError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
