//! HTTP route table

mod admin;
mod health;
mod webhooks;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health))
        .route("/webhooks/stripe", post(webhooks::receive_stripe))
        .route("/webhooks/iyzico", post(webhooks::receive_iyzico))
        .route("/webhooks/events", get(webhooks::list_events))
        .route("/admin/webhooks/retry", post(admin::retry_failed))
        .route("/admin/webhooks/cleanup", post(admin::cleanup))
        .with_state(state)
}
