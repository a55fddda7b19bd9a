//! Shared library for the notegen backend services
//!
//! This crate provides common functionality used by the pipeline worker
//! and the admin API gateway:
//! - Database connection pooling and the persistence store
//! - Data models matching the PostgreSQL schema
//! - Error handling types
//! - Configuration management (YAML + env + remote overlay)
//! - Pipeline job envelope and payload definitions

pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod models;
pub mod store;

// Re-export commonly used types
pub use config::Config;
pub use db::DbPool;
pub use error::{Error, Result};
pub use jobs::{JobKind, Lane, PipelineJob};
pub use store::{InMemoryStore, PostgresStore, Store};

/// Initialize tracing subscriber for structured logging
pub fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "shared=debug,api_gateway=debug,pipeline_worker=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
