use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use loyalty_engine::{
    accrual_client::{AccrualClient, HttpAccrualClient},
    config::Config,
    database::{LedgerStore, PgLedgerStore},
    handlers,
    services::{BalanceService, OrderService, ReconciliationService},
};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_file(true)
        .with_line_number(true)
        .with_thread_ids(true)
        .with_target(false)
        .json()
        .init();

    info!("Starting Loyalty Engine...");

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    let pg_store = Arc::new(
        PgLedgerStore::new(
            &config.database.url,
            config.database.max_connections,
            config.database.min_connections,
            Duration::from_secs(config.database.acquire_timeout_secs),
        )
        .await
        .context("Failed to connect to database")?,
    );
    pg_store.migrate().await.context("Failed to run migrations")?;

    info!("Database connected successfully");

    let store: Arc<dyn LedgerStore> = pg_store.clone();
    let accrual: Arc<dyn AccrualClient> = Arc::new(HttpAccrualClient::new(
        config.accrual.base_url.clone(),
        config.accrual.timeout(),
        config.accrual.default_retry_after(),
    )?);

    info!("Accrual client initialized for {}", config.accrual.base_url);

    let order_service = Arc::new(OrderService::new(store.clone()));
    let balance_service = Arc::new(BalanceService::new(store.clone()));
    let reconciliation = Arc::new(ReconciliationService::new(store, accrual));

    let shutdown = CancellationToken::new();
    let reconciler = if config.accrual.background_enabled {
        Some(tokio::spawn(reconciliation.clone().run(
            config.accrual.poll_interval(),
            config.accrual.batch_size,
            shutdown.clone(),
        )))
    } else {
        info!("Background reconciliation disabled");
        None
    };

    let server_config = config.server.clone();
    let jwt_secret = config.auth.jwt_secret.clone();

    info!(
        "Starting HTTP server on {}:{}",
        server_config.host, server_config.port
    );

    HttpServer::new(move || {
        let jwt_secret = jwt_secret.clone();
        App::new()
            .app_data(web::Data::new(order_service.clone()))
            .app_data(web::Data::new(balance_service.clone()))
            .app_data(web::Data::new(reconciliation.clone()))
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .configure(move |cfg| handlers::configure_routes(cfg, &jwt_secret))
    })
    .workers(server_config.workers)
    .bind((server_config.host, server_config.port))?
    .run()
    .await?;

    info!("HTTP server stopped, shutting down");

    shutdown.cancel();
    if let Some(handle) = reconciler {
        handle.await.ok();
    }
    pg_store.close().await;

    Ok(())
}
