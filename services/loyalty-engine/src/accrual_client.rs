//! Client for the external accrual service.
//!
//! The client never retries. A rate-limit answer is returned as
//! [`LoyaltyError::TooManyRequests`] with the advised delay and the caller
//! decides when to come back.

use crate::errors::{LoyaltyError, Result};
use crate::metrics;
use crate::models::AccrualResponse;
use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, warn};

#[async_trait]
pub trait AccrualClient: Send + Sync {
    async fn get_order_accrual(&self, order_number: &str) -> Result<AccrualResponse>;
}

pub struct HttpAccrualClient {
    base_url: String,
    client: Client,
    default_retry_after: Duration,
}

impl HttpAccrualClient {
    pub fn new(base_url: String, timeout: Duration, default_retry_after: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LoyaltyError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(HttpAccrualClient {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
            default_retry_after,
        })
    }

    fn retry_after(&self, response: &reqwest::Response) -> Duration {
        response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.trim().parse::<u64>().ok())
            .map(Duration::from_secs)
            .unwrap_or(self.default_retry_after)
    }
}

#[async_trait]
impl AccrualClient for HttpAccrualClient {
    async fn get_order_accrual(&self, order_number: &str) -> Result<AccrualResponse> {
        let url = format!("{}/api/orders/{}", self.base_url, order_number);

        let response = self.client.get(&url).send().await.map_err(|e| {
            metrics::ACCRUAL_REQUESTS.with_label_values(&["transport_error"]).inc();
            LoyaltyError::AccrualService(format!("Accrual request failed: {}", e))
        })?;

        match response.status() {
            StatusCode::OK => {
                let accrual = response.json::<AccrualResponse>().await.map_err(|e| {
                    metrics::ACCRUAL_REQUESTS.with_label_values(&["decode_error"]).inc();
                    LoyaltyError::AccrualService(format!("Failed to parse accrual response: {}", e))
                })?;
                metrics::ACCRUAL_REQUESTS.with_label_values(&["ok"]).inc();
                debug!("Accrual for order {}: {:?}", order_number, accrual.status);
                Ok(accrual)
            }
            StatusCode::NO_CONTENT => {
                metrics::ACCRUAL_REQUESTS.with_label_values(&["no_content"]).inc();
                Ok(AccrualResponse::processing(order_number))
            }
            StatusCode::NOT_FOUND => {
                metrics::ACCRUAL_REQUESTS.with_label_values(&["not_found"]).inc();
                Ok(AccrualResponse::invalid(order_number))
            }
            StatusCode::TOO_MANY_REQUESTS => {
                metrics::ACCRUAL_REQUESTS.with_label_values(&["rate_limited"]).inc();
                let retry_after = self.retry_after(&response);
                warn!(
                    "Accrual service rate limited, retry after {}s",
                    retry_after.as_secs()
                );
                Err(LoyaltyError::TooManyRequests { retry_after })
            }
            status => {
                metrics::ACCRUAL_REQUESTS.with_label_values(&["error"]).inc();
                let error_text = response.text().await.unwrap_or_default();
                Err(LoyaltyError::AccrualService(format!(
                    "Accrual service responded with status {}: {}",
                    status, error_text
                )))
            }
        }
    }
}
