//! Settings endpoints
//!
//! PUT uses partial-update semantics: only the provided fields overwrite
//! the stored row. Secret fields are accepted on write but never echoed
//! back.

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use validator::Validate;

use crate::error::ApiError;

use super::AppState;

pub async fn get_settings(state: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let setting = state.store.get_setting().await?;
    Ok(HttpResponse::Ok().json(setting))
}

/// Partial settings update
#[derive(Debug, Deserialize, Validate)]
pub struct UpdateSettingsRequest {
    #[validate(custom(function = "validate_connector_mode"))]
    pub connector_mode: Option<String>,
    pub bridge_server_url: Option<String>,
    pub bridge_auth: Option<String>,
    pub note_target: Option<String>,
    #[validate(range(min = 10))]
    pub polling_interval_sec: Option<i32>,
    pub llm_base_url: Option<String>,
    pub llm_api_key: Option<String>,
    pub llm_model: Option<String>,
    #[validate(range(min = 5, max = 300))]
    pub llm_timeout_sec: Option<i32>,
    #[validate(range(min = 0.0, max = 1.0))]
    pub intent_threshold: Option<f64>,
    pub provider_json: Option<String>,
}

fn validate_connector_mode(mode: &str) -> Result<(), validator::ValidationError> {
    if !["mock", "bridge"].contains(&mode) {
        return Err(validator::ValidationError::new("invalid_connector_mode"));
    }
    Ok(())
}

pub async fn update_settings(
    state: web::Data<AppState>,
    request: web::Json<UpdateSettingsRequest>,
) -> Result<HttpResponse, ApiError> {
    let request = request.into_inner();
    request.validate()?;

    if let Some(provider_json) = &request.provider_json {
        // Reject malformed provider lists before they reach the worker
        serde_json::from_str::<serde_json::Value>(provider_json)
            .map_err(|e| ApiError::bad_request(format!("invalid provider_json: {}", e)))?;
    }

    let mut setting = state.store.get_setting().await?;

    if let Some(connector_mode) = request.connector_mode {
        setting.connector_mode = connector_mode;
    }
    if let Some(bridge_server_url) = request.bridge_server_url {
        setting.bridge_server_url = Some(bridge_server_url);
    }
    if let Some(bridge_auth) = request.bridge_auth {
        setting.bridge_auth = Some(bridge_auth);
    }
    if let Some(note_target) = request.note_target {
        setting.note_target = note_target;
    }
    if let Some(polling_interval_sec) = request.polling_interval_sec {
        setting.polling_interval_sec = polling_interval_sec;
    }
    if let Some(llm_base_url) = request.llm_base_url {
        setting.llm_base_url = Some(llm_base_url);
    }
    if let Some(llm_api_key) = request.llm_api_key {
        setting.llm_api_key = Some(llm_api_key);
    }
    if let Some(llm_model) = request.llm_model {
        setting.llm_model = Some(llm_model);
    }
    if let Some(llm_timeout_sec) = request.llm_timeout_sec {
        setting.llm_timeout_sec = llm_timeout_sec;
    }
    if let Some(intent_threshold) = request.intent_threshold {
        setting.intent_threshold = intent_threshold;
    }
    if let Some(provider_json) = request.provider_json {
        setting.provider_json = provider_json;
    }

    let updated = state.store.update_setting(&setting).await?;
    Ok(HttpResponse::Ok().json(updated))
}

#[cfg(test)]
mod tests {
    use crate::handlers::{configure, testutil::test_state};
    use actix_web::{test, App};
    use serde_json::json;
    use shared::Store;

    #[actix_web::test]
    async fn test_get_settings_hides_secrets() {
        let ts = test_state();
        let mut setting = ts.store.get_setting().await.unwrap();
        setting.llm_api_key = Some("sk-secret".to_string());
        ts.store.seed_setting(setting);

        let app =
            test::init_service(App::new().app_data(ts.state.clone()).configure(configure)).await;
        let resp = test::call_service(
            &app,
            test::TestRequest::get().uri("/api/settings").to_request(),
        )
        .await;
        assert!(resp.status().is_success());

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["note_target"], "mock_note_001");
        assert!(body.get("llm_api_key").is_none());
    }

    #[actix_web::test]
    async fn test_partial_update_touches_only_provided_fields() {
        let ts = test_state();
        let app =
            test::init_service(App::new().app_data(ts.state.clone()).configure(configure)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/settings")
                .set_json(json!({"intent_threshold": 0.85}))
                .to_request(),
        )
        .await;
        assert!(resp.status().is_success());

        let setting = ts.store.get_setting().await.unwrap();
        assert!((setting.intent_threshold - 0.85).abs() < f64::EPSILON);
        // Untouched fields keep their values
        assert_eq!(setting.note_target, "mock_note_001");
        assert_eq!(setting.polling_interval_sec, 120);
    }

    #[actix_web::test]
    async fn test_polling_interval_floor_is_enforced() {
        let ts = test_state();
        let app =
            test::init_service(App::new().app_data(ts.state.clone()).configure(configure)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/settings")
                .set_json(json!({"polling_interval_sec": 5}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);

        let body: serde_json::Value = test::read_body_json(resp).await;
        assert_eq!(body["code"], "INVALID_REQUEST");
    }

    #[actix_web::test]
    async fn test_invalid_provider_json_is_rejected() {
        let ts = test_state();
        let app =
            test::init_service(App::new().app_data(ts.state.clone()).configure(configure)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/settings")
                .set_json(json!({"provider_json": "not json"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }

    #[actix_web::test]
    async fn test_invalid_connector_mode_is_rejected() {
        let ts = test_state();
        let app =
            test::init_service(App::new().app_data(ts.state.clone()).configure(configure)).await;

        let resp = test::call_service(
            &app,
            test::TestRequest::put()
                .uri("/api/settings")
                .set_json(json!({"connector_mode": "stream"}))
                .to_request(),
        )
        .await;
        assert_eq!(resp.status().as_u16(), 400);
    }
}
