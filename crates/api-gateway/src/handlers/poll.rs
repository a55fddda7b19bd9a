//! Manual poll trigger

use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::error::ApiError;

use super::AppState;

/// Enqueue one immediate poll for the configured note target
pub async fn run_poll(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let setting = state.store.get_setting().await?;
    state.enqueuer.enqueue_poll(&setting.note_target).await?;

    Ok(HttpResponse::Ok().json(json!({"message": "Poll task enqueued"})))
}
