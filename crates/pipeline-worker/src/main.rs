//! Pipeline worker binary
//!
//! Wires the store, queue, connector, intent gate, providers and mailer
//! together, then runs the scheduler and the consumer pool until a
//! shutdown signal arrives.

use anyhow::{Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

use pipeline_worker::connector::build_connector;
use pipeline_worker::dlq::RedisDlq;
use pipeline_worker::handlers::Pipeline;
use pipeline_worker::intent::llm::HttpLlmClient;
use pipeline_worker::intent::IntentExtractor;
use pipeline_worker::lock::RedisPollLock;
use pipeline_worker::mailer::{HttpMailer, InMemoryMailer, Mailer};
use pipeline_worker::provider::{build_registry, parse_provider_configs};
use pipeline_worker::queue::{RedisJobConsumer, RedisJobQueue};
use pipeline_worker::rate_limiter::RedisRecipientRateLimiter;
use pipeline_worker::runtime::{run_worker_pool, JobRunner};
use pipeline_worker::scheduler::run_scheduler;
use pipeline_worker::storage::InMemoryObjectStore;
use shared::store::PostgresStore;
use shared::{db, Config, Store};

/// How long shutdown waits for in-flight handlers to drain
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    shared::init_tracing();

    tracing::info!("Starting pipeline worker...");

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

    let store: Arc<dyn Store> = Arc::new(PostgresStore::new(db_pool));

    let redis_client = redis::Client::open(config.redis.connection_url())
        .context("Failed to create Redis client")?;
    let redis_conn = redis_client
        .get_multiplexed_async_connection()
        .await
        .context("Failed to connect to Redis")?;

    tracing::info!("Connected to Redis");

    let setting = store
        .get_setting()
        .await
        .context("Failed to load settings row")?;

    let connector = build_connector(&setting).context("Failed to build connector")?;

    // Admin-set LLM fields take precedence over the static config
    let llm_base_url = setting
        .llm_base_url
        .clone()
        .filter(|url| !url.is_empty())
        .unwrap_or_else(|| config.llm.base_url.clone());
    let llm_api_key = setting
        .llm_api_key
        .clone()
        .filter(|key| !key.is_empty())
        .unwrap_or_else(|| config.llm.api_key.clone());
    let llm_model = setting
        .llm_model
        .clone()
        .filter(|model| !model.is_empty())
        .unwrap_or_else(|| config.llm.model.clone());
    let llm_timeout = Duration::from_secs(setting.llm_timeout_sec.max(1) as u64);

    let llm_client = HttpLlmClient::new(llm_base_url, llm_api_key, llm_model, llm_timeout)
        .context("Failed to build LLM client")?;
    let intent = IntentExtractor::new(Arc::new(llm_client), config.llm.max_retries);

    let storage = Arc::new(InMemoryObjectStore::new(
        config.object_store.bucket.clone(),
        Duration::from_secs(config.object_store.presign_expiry_sec),
    ));
    if !config.object_store.endpoint.is_empty() {
        tracing::warn!(
            endpoint = %config.object_store.endpoint,
            "External object store configured but not wired in this build; using in-memory store"
        );
    }

    let provider_configs = parse_provider_configs(&setting.provider_json)
        .context("Failed to parse provider configuration")?;
    let providers = build_registry(&provider_configs, storage);
    tracing::info!(providers = providers.len(), "Provider registry built");

    let mailer: Arc<dyn Mailer> = if config.mail.base_url.is_empty() {
        tracing::warn!("Mail transport not configured; deliveries go to the in-memory mailer");
        Arc::new(InMemoryMailer::new())
    } else {
        Arc::new(
            HttpMailer::new(
                config.mail.base_url.clone(),
                config.mail.api_key.clone(),
                config.mail.from.clone(),
                Duration::from_secs(config.mail.timeout_sec),
            )
            .context("Failed to build mailer")?,
        )
    };

    let queue = Arc::new(RedisJobQueue::new(redis_conn.clone()));
    let consumer = Arc::new(RedisJobConsumer::new(
        redis_conn.clone(),
        (
            config.worker.weight_critical,
            config.worker.weight_default,
            config.worker.weight_low,
        ),
    ));
    let dlq = Arc::new(RedisDlq::new(redis_conn.clone()));
    let lock = Arc::new(RedisPollLock::new(redis_conn.clone()));
    let rate_limiter = Arc::new(RedisRecipientRateLimiter::new(redis_conn));

    let pipeline = Arc::new(Pipeline::new(
        store.clone(),
        queue.clone(),
        connector,
        intent,
        providers,
        mailer,
        lock,
        rate_limiter,
    ));

    let runner = Arc::new(JobRunner::new(
        pipeline,
        queue.clone(),
        dlq,
        config.worker.max_attempts,
    ));

    let shutdown = CancellationToken::new();

    let scheduler_handle = tokio::spawn(run_scheduler(
        store.clone(),
        queue.clone(),
        shutdown.clone(),
    ));

    let pool_handle = tokio::spawn(run_worker_pool(
        runner,
        consumer,
        config.worker.concurrency,
        shutdown.clone(),
    ));

    tracing::info!(
        concurrency = config.worker.concurrency,
        "Pipeline worker ready"
    );

    signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;

    tracing::info!("Shutdown signal received, draining workers...");
    shutdown.cancel();

    if tokio::time::timeout(SHUTDOWN_GRACE, async {
        let _ = scheduler_handle.await;
        let _ = pool_handle.await;
    })
    .await
    .is_err()
    {
        tracing::warn!("Drain deadline exceeded, exiting with work in flight");
    }

    tracing::info!("Pipeline worker exited");
    Ok(())
}
