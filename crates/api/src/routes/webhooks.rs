//! Webhook ingress and event listing
//!
//! The raw request body is passed through untouched: Stripe signature
//! verification runs over the exact bytes the provider signed, so no
//! JSON extractor sits in front of the handler.

use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::Json;
use serde::Deserialize;
use serde_json::{json, Value};

use propdesk_billing::{BillingError, EventFilter, EventPage, EventSource};

use crate::error::ApiResult;
use crate::state::AppState;

pub async fn receive_stripe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> ApiResult<Json<Value>> {
    let signature = headers
        .get("stripe-signature")
        .and_then(|v| v.to_str().ok());
    state
        .billing
        .webhooks
        .ingest(EventSource::Stripe, &body, signature)
        .await?;
    Ok(Json(json!({ "received": true })))
}

pub async fn receive_iyzico(
    State(state): State<AppState>,
    body: String,
) -> ApiResult<Json<Value>> {
    state
        .billing
        .webhooks
        .ingest(EventSource::Iyzico, &body, None)
        .await?;
    Ok(Json(json!({ "received": true })))
}

#[derive(Debug, Default, Deserialize)]
pub struct EventListQuery {
    status: Option<String>,
    source: Option<String>,
    page: Option<u32>,
    limit: Option<u32>,
}

/// Paginated event listing with optional status/source filters.
/// Unknown filter values are a client error, not an empty result.
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<EventListQuery>,
) -> ApiResult<Json<EventPage>> {
    let mut filter = EventFilter::default();

    if let Some(status) = &query.status {
        filter.status = Some(status.parse().map_err(|_| {
            BillingError::InvalidPayload(format!("unknown status filter: {status}"))
        })?);
    }
    if let Some(source) = &query.source {
        filter.source = Some(source.parse().map_err(|_| {
            BillingError::InvalidPayload(format!("unknown source filter: {source}"))
        })?);
    }
    if let Some(page) = query.page {
        filter.page = page;
    }
    if let Some(limit) = query.limit {
        filter.limit = limit;
    }

    let page = state.billing.events.list(filter).await?;
    Ok(Json(page))
}
