use crate::errors::LoyaltyError;
use crate::metrics;
use crate::models::{BalanceResponse, UploadOutcome, WithdrawRequest, WithdrawResponse};
use crate::security_middleware::{AuthenticatedUser, JwtAuth};
use crate::services::{BalanceService, OrderService, ReconciliationService};
use actix_web::{error, web, HttpResponse};
use serde_json::json;
use std::sync::Arc;
use tracing::error;

/// Health check endpoint
pub async fn health_check() -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "status": "healthy",
        "service": "loyalty-engine",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Upload an order number (plain-text body)
pub async fn upload_order(
    service: web::Data<Arc<OrderService>>,
    user: AuthenticatedUser,
    body: String,
) -> Result<HttpResponse, LoyaltyError> {
    let number = body.trim();
    if number.is_empty() {
        return Ok(HttpResponse::BadRequest().finish());
    }

    match service.upload_order(user.0, number).await? {
        UploadOutcome::Accepted => Ok(HttpResponse::Accepted().finish()),
        UploadOutcome::AlreadyUploaded => Ok(HttpResponse::Ok().finish()),
    }
}

/// List the caller's orders with live accrual status
pub async fn list_orders(
    service: web::Data<Arc<ReconciliationService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, LoyaltyError> {
    let orders = service.user_orders(user.0).await?;
    if orders.is_empty() {
        return Ok(HttpResponse::NoContent().finish());
    }

    Ok(HttpResponse::Ok().json(orders))
}

/// Current and withdrawn points
pub async fn get_balance(
    service: web::Data<Arc<BalanceService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, LoyaltyError> {
    let account = service.get_balance(user.0).await?;
    Ok(HttpResponse::Ok().json(BalanceResponse::from(account)))
}

/// Spend points
pub async fn withdraw(
    service: web::Data<Arc<BalanceService>>,
    user: AuthenticatedUser,
    request: web::Json<WithdrawRequest>,
) -> Result<HttpResponse, LoyaltyError> {
    let request = request.into_inner();
    let current = service.withdraw(user.0, &request.order, request.sum).await?;
    Ok(HttpResponse::Ok().json(WithdrawResponse { current }))
}

/// Withdrawal history, most recent first
pub async fn list_withdrawals(
    service: web::Data<Arc<BalanceService>>,
    user: AuthenticatedUser,
) -> Result<HttpResponse, LoyaltyError> {
    let withdrawals = service.get_withdrawals(user.0).await?;
    if withdrawals.is_empty() {
        return Ok(HttpResponse::NoContent().finish());
    }

    Ok(HttpResponse::Ok().json(withdrawals))
}

/// Prometheus metrics endpoint
pub async fn metrics_endpoint() -> HttpResponse {
    metrics_response(metrics::metrics_handler())
}

fn metrics_response(gathered: Result<String, Box<dyn std::error::Error>>) -> HttpResponse {
    match gathered {
        Ok(body) => HttpResponse::Ok()
            .content_type("text/plain; version=0.0.4")
            .body(body),
        Err(e) => {
            error!("Failed to gather metrics: {}", e);
            HttpResponse::InternalServerError().json(json!({
                "error": "Failed to gather metrics",
            }))
        }
    }
}

/// Configure routes. Everything under `/api/user` requires a verified caller.
pub fn configure_routes(cfg: &mut web::ServiceConfig, jwt_secret: &str) {
    // Malformed withdrawal payloads are a client error on the order, not a 400.
    let json_config = web::JsonConfig::default().error_handler(|err, _req| {
        error::InternalError::from_response(err, HttpResponse::UnprocessableEntity().finish())
            .into()
    });

    cfg.service(
        web::scope("/api/user")
            .wrap(JwtAuth::new(jwt_secret.to_string()))
            .app_data(json_config)
            .service(
                web::resource("/orders")
                    .route(web::post().to(upload_order))
                    .route(web::get().to(list_orders)),
            )
            .route("/balance", web::get().to(get_balance))
            .route("/balance/withdraw", web::post().to(withdraw))
            .route("/withdrawals", web::get().to(list_withdrawals)),
    )
    .route("/metrics", web::get().to(metrics_endpoint))
    .route("/health", web::get().to(health_check));
}
