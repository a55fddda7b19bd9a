//! Admin API handlers

pub mod health;
pub mod poll;
pub mod settings;
pub mod tasks;

use actix_web::web;
use std::sync::Arc;

use shared::Store;

use crate::queue::PollEnqueuer;

/// Shared handler state
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub enqueuer: Arc<dyn PollEnqueuer>,
}

/// Register all routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/healthz", web::get().to(health::healthz)).service(
        web::scope("/api")
            .route("/settings", web::get().to(settings::get_settings))
            .route("/settings", web::put().to(settings::update_settings))
            .route("/poll/run", web::post().to(poll::run_poll))
            .route("/tasks", web::get().to(tasks::list_tasks))
            .route("/tasks/{id}", web::get().to(tasks::get_task)),
    );
}

#[cfg(test)]
pub(crate) mod testutil {
    use super::*;
    use crate::queue::InMemoryPollEnqueuer;
    use shared::InMemoryStore;

    pub struct TestState {
        pub store: Arc<InMemoryStore>,
        pub enqueuer: Arc<InMemoryPollEnqueuer>,
        pub state: web::Data<AppState>,
    }

    pub fn test_state() -> TestState {
        let store = Arc::new(InMemoryStore::with_mock_setting());
        let enqueuer = Arc::new(InMemoryPollEnqueuer::new());
        let state = web::Data::new(AppState {
            store: store.clone(),
            enqueuer: enqueuer.clone(),
        });
        TestState {
            store,
            enqueuer,
            state,
        }
    }
}
