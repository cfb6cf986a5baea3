pub mod accrual_client;
pub mod config;
pub mod database;
pub mod errors;
pub mod handlers;
pub mod luhn;
pub mod metrics;
pub mod models;
pub mod security_middleware;
pub mod services;

pub use config::Config;
pub use errors::{LoyaltyError, Result};
