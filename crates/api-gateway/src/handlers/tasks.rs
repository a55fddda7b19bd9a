//! Task inspection endpoints

use actix_web::{web, HttpResponse};
use serde::Deserialize;
use serde_json::json;

use crate::error::ApiError;

use super::AppState;

const DEFAULT_LIMIT: i64 = 100;
const MAX_LIMIT: i64 = 1000;

#[derive(Debug, Deserialize)]
pub struct ListTasksQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

pub async fn list_tasks(
    state: web::Data<AppState>,
    query: web::Query<ListTasksQuery>,
) -> Result<HttpResponse, ApiError> {
    let limit = match query.limit {
        Some(limit) if (1..=MAX_LIMIT).contains(&limit) => limit,
        _ => DEFAULT_LIMIT,
    };
    let offset = query.offset.filter(|offset| *offset >= 0).unwrap_or(0);

    let tasks = state.store.list_tasks(limit, offset).await?;

    Ok(HttpResponse::Ok().json(json!({
        "tasks": tasks,
        "limit": limit,
        "offset": offset,
    })))
}

pub async fn get_task(
    state: web::Data<AppState>,
    path: web::Path<i64>,
) -> Result<HttpResponse, ApiError> {
    let id = path.into_inner();
    let task = state.store.get_task(id).await?;
    let deliveries = state.store.list_deliveries(id).await?;

    Ok(HttpResponse::Ok().json(json!({
        "task": task,
        "deliveries": deliveries,
    })))
}
