//! Admin API gateway for the notegen backend
//!
//! Exposes settings management, manual poll runs, and task inspection
//! over HTTP. All pipeline work happens in the worker; this surface only
//! reads and writes the store and enqueues poll jobs.

use actix_web::{web, App, HttpServer};
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing_actix_web::TracingLogger;

use shared::store::PostgresStore;
use shared::{db, Config, Store};

mod error;
mod handlers;
mod queue;

use handlers::AppState;
use queue::RedisPollEnqueuer;

#[actix_web::main]
async fn main() -> Result<()> {
    shared::init_tracing();

    tracing::info!("Starting API gateway...");

    let mut config = Config::load("config/config").context("Failed to load configuration")?;
    config.apply_remote_overlay().await;

    let db_pool = db::create_pool(&config.database)
        .await
        .context("Failed to create database pool")?;
    db::run_migrations(&db_pool)
        .await
        .context("Failed to run migrations")?;
    db::check_health(&db_pool)
        .await
        .context("Database health check failed")?;

    let redis_client = redis::Client::open(config.redis.connection_url())
        .context("Failed to create Redis client")?;
    let redis_conn = redis_client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    tracing::info!("Connected to Redis");

    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(db_pool));
    let enqueuer = Arc::new(RedisPollEnqueuer::new(redis_conn));

    let state = web::Data::new(AppState {
        store,
        enqueuer,
    });

    let bind_addr = (config.server.host.clone(), config.server.port);
    tracing::info!(host = %config.server.host, port = config.server.port, "API gateway listening");

    HttpServer::new(move || {
        App::new()
            .wrap(TracingLogger::default())
            .app_data(state.clone())
            .configure(handlers::configure)
    })
    .client_request_timeout(std::time::Duration::from_secs(
        config.server.read_timeout_sec,
    ))
    .bind(bind_addr)
    .context("Failed to bind server address")?
    .run()
    .await
    .context("Server error")?;

    tracing::info!("API gateway exited");
    Ok(())
}
