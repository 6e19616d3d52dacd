//! Operational endpoints for the event log
//!
//! Exposed for scheduled jobs and manual operations; neither endpoint
//! reprocesses events itself.

use axum::extract::{Query, State};
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn retry_failed(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let outcome = state.billing.maintenance.retry_failed().await?;
    Ok(Json(json!({ "retried_count": outcome.retried_count })))
}

#[derive(Debug, Deserialize)]
pub struct CleanupQuery {
    days: Option<i64>,
}

pub async fn cleanup(
    State(state): State<AppState>,
    Query(query): Query<CleanupQuery>,
) -> ApiResult<Json<Value>> {
    let days = query.days.unwrap_or(30);
    let outcome = state.billing.maintenance.cleanup(days).await?;
    Ok(Json(json!({ "deleted_count": outcome.deleted_count })))
}
