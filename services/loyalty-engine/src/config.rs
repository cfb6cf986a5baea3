use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub accrual: AccrualConfig,
    pub auth: AuthConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub workers: usize,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AccrualConfig {
    pub base_url: String,
    pub timeout_secs: u64,
    /// Used when a 429 carries no usable `Retry-After` header.
    pub default_retry_after_secs: u64,
    pub poll_interval_secs: u64,
    pub batch_size: i64,
    pub background_enabled: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

impl AccrualConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn default_retry_after(&self) -> Duration {
        Duration::from_secs(self.default_retry_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        let environment = env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());

        let mut builder = config::Config::builder()
            .set_default("server.host", "0.0.0.0")?
            .set_default("server.port", 8080)?
            .set_default("server.workers", 4)?
            .set_default("database.url", "")?
            .set_default("database.max_connections", 10)?
            .set_default("database.min_connections", 2)?
            .set_default("database.acquire_timeout_secs", 5)?
            .set_default("accrual.base_url", "")?
            .set_default("accrual.timeout_secs", 5)?
            .set_default("accrual.default_retry_after_secs", 60)?
            .set_default("accrual.poll_interval_secs", 10)?
            .set_default("accrual.batch_size", 50)?
            .set_default("accrual.background_enabled", true)?
            .set_default("auth.jwt_secret", "")?;

        if let Ok(config_file) = env::var("CONFIG_FILE") {
            builder = builder.add_source(File::with_name(&config_file).required(false));
        } else {
            builder = builder.add_source(
                File::with_name(&format!("config/{}", environment)).required(false),
            );
        }

        builder = builder.add_source(
            Environment::with_prefix("LOYALTY_ENGINE")
                .separator("__")
                .try_parsing(true),
        );

        if let Ok(address) = env::var("RUN_ADDRESS") {
            let (host, port) = split_address(&address).ok_or_else(|| {
                ConfigError::Message(format!("RUN_ADDRESS must be host:port, got {}", address))
            })?;
            builder = builder
                .set_override("server.host", host)?
                .set_override("server.port", port)?;
        }

        if let Ok(db_url) = env::var("DATABASE_URI") {
            builder = builder.set_override("database.url", db_url)?;
        }

        if let Ok(accrual_url) = env::var("ACCRUAL_SYSTEM_ADDRESS") {
            builder = builder.set_override("accrual.base_url", accrual_url)?;
        }

        if let Ok(secret) = env::var("JWT_SECRET") {
            builder = builder.set_override("auth.jwt_secret", secret)?;
        }

        builder.build()?.try_deserialize()
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.server.port == 0 {
            return Err("Server port cannot be 0".to_string());
        }

        if self.database.url.is_empty() {
            return Err("Database URL is required".to_string());
        }

        if self.accrual.base_url.is_empty() {
            return Err("Accrual service address is required".to_string());
        }

        if self.accrual.timeout_secs == 0 {
            return Err("Accrual timeout must be positive".to_string());
        }

        if self.accrual.batch_size <= 0 {
            return Err("Accrual batch size must be positive".to_string());
        }

        if self.auth.jwt_secret.is_empty() {
            return Err("JWT secret is required".to_string());
        }

        Ok(())
    }
}

/// Splits `host:port`; an empty host (":8080") binds all interfaces.
fn split_address(address: &str) -> Option<(String, i64)> {
    let (host, port) = address.rsplit_once(':')?;
    let port = port.parse::<u16>().ok()?;
    let host = if host.is_empty() { "0.0.0.0" } else { host };
    Some((host.to_string(), i64::from(port)))
}
