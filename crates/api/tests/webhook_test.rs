//! End-to-end webhook endpoint tests over the in-memory store.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use hmac::{Hmac, Mac};
use serde_json::{json, Value};
use sha2::Sha256;
use time::OffsetDateTime;
use tower::ServiceExt;
use uuid::Uuid;

use propdesk_api::{create_router, AppState, Config};
use propdesk_billing::{
    BillingService, EventSource, EventStatus, MemoryStore, Store, SubscriptionStatus,
    WebhookConfig,
};

const TEST_SECRET: &str = "whsec_testsecret";

fn test_app() -> (Router, Arc<MemoryStore>, Arc<BillingService>) {
    let store = Arc::new(MemoryStore::new());
    let billing = BillingService::new(store.clone(), WebhookConfig::new(TEST_SECRET));
    let billing = Arc::new(billing);
    let config = Config {
        database_url: "postgres://unused".to_string(),
        bind_address: "127.0.0.1:0".to_string(),
        stripe_webhook_secret: TEST_SECRET.to_string(),
    };
    let state = AppState {
        billing: billing.clone(),
        config,
    };
    (create_router(state), store, billing)
}

fn sign(payload: &str) -> String {
    let ts = OffsetDateTime::now_utc().unix_timestamp();
    let mut mac = Hmac::<Sha256>::new_from_slice(b"testsecret").unwrap();
    mac.update(format!("{ts}.{payload}").as_bytes());
    format!("t={ts},v1={}", hex::encode(mac.finalize().into_bytes()))
}

fn subscription_created_payload(external_id: &str) -> String {
    json!({
        "type": "customer.subscription.created",
        "data": {
            "object": {
                "id": external_id,
                "status": "active",
                "metadata": {
                    "user_id": Uuid::new_v4().to_string(),
                    "plan_id": "brokerage-pro"
                },
                "current_period_start": 1_700_000_000,
                "current_period_end": 1_702_592_000,
                "plan": {"interval": "month"}
            }
        }
    })
    .to_string()
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: String, signature: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json");
    if let Some(sig) = signature {
        builder = builder.header("stripe-signature", sig);
    }
    builder.body(Body::from(body)).unwrap()
}

#[tokio::test]
async fn stripe_webhook_with_valid_signature_is_accepted() {
    let (app, _store, billing) = test_app();
    let payload = subscription_created_payload("sub_valid");
    let sig = sign(&payload);

    let response = app
        .oneshot(post("/webhooks/stripe", payload, Some(&sig)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "received": true }));

    let sub = billing
        .subscriptions
        .find_by_external_id("sub_valid")
        .await
        .unwrap()
        .expect("subscription should be created");
    assert_eq!(sub.status, SubscriptionStatus::Active);
    assert_eq!(sub.plan_id.as_deref(), Some("brokerage-pro"));
}

#[tokio::test]
async fn stripe_webhook_without_signature_is_rejected_and_not_logged() {
    let (app, store, _billing) = test_app();
    let payload = subscription_created_payload("sub_nosig");

    let response = app
        .oneshot(post("/webhooks/stripe", payload, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"], "missing_signature");

    let (events, total) = store
        .list_events(&propdesk_billing::EventFilter::default())
        .await
        .unwrap();
    assert!(events.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn stripe_webhook_with_bad_signature_is_rejected() {
    let (app, _store, _billing) = test_app();
    let payload = subscription_created_payload("sub_badsig");
    let sig = sign("something else entirely");

    let response = app
        .oneshot(post("/webhooks/stripe", payload, Some(&sig)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_signature");
}

#[tokio::test]
async fn malformed_json_is_rejected() {
    let (app, _store, _billing) = test_app();

    let response = app
        .oneshot(post("/webhooks/iyzico", "{broken".to_string(), None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(response).await["error"], "invalid_payload");
}

#[tokio::test]
async fn iyzico_webhook_needs_no_signature() {
    let (app, store, _billing) = test_app();
    let payload = json!({
        "eventType": "SUBSCRIPTION_RENEWED",
        "data": {"subscriptionReferenceCode": "iyz-unknown"}
    })
    .to_string();

    let response = app
        .oneshot(post("/webhooks/iyzico", payload, None))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "received": true }));

    let (events, _) = store
        .list_events(&propdesk_billing::EventFilter::default())
        .await
        .unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].source, EventSource::Iyzico);
    assert_eq!(events[0].status, EventStatus::Processed);
}

#[tokio::test]
async fn unknown_event_type_is_acknowledged() {
    let (app, _store, _billing) = test_app();
    let payload = json!({"type": "charge.refunded", "data": {"object": {}}}).to_string();
    let sig = sign(&payload);

    let response = app
        .oneshot(post("/webhooks/stripe", payload, Some(&sig)))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn event_listing_pages_and_filters() {
    let (app, _store, billing) = test_app();

    for i in 0..3 {
        billing
            .webhooks
            .ingest(
                EventSource::Iyzico,
                &json!({
                    "eventType": "SUBSCRIPTION_RENEWED",
                    "data": {"subscriptionReferenceCode": format!("iyz-{i}")}
                })
                .to_string(),
                None,
            )
            .await
            .unwrap();
    }

    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/webhooks/events?limit=2&page=1")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["events"].as_array().unwrap().len(), 2);
    assert_eq!(body["pagination"]["total"], 3);
    assert_eq!(body["pagination"]["pages"], 2);
    assert_eq!(body["pagination"]["limit"], 2);

    // Filtered by status: nothing failed yet.
    let response = app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/webhooks/events?status=failed")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let body = body_json(response).await;
    assert_eq!(body["pagination"]["total"], 0);

    // Unknown filter value is a client error.
    let response = app
        .oneshot(
            Request::builder()
                .uri("/webhooks/events?status=bogus")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn retry_endpoint_requeues_failed_events() {
    let (app, store, _billing) = test_app();

    let event = store
        .insert_event(propdesk_billing::NewWebhookEvent {
            event_type: "INVOICE_CREATED".to_string(),
            source: EventSource::Iyzico,
            payload: json!({}),
            created_at: OffsetDateTime::now_utc(),
        })
        .await
        .unwrap();
    store
        .update_event_status(event.id, EventStatus::Failed, Some("boom".to_string()))
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/webhooks/retry")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "retried_count": 1 }));

    let retried = store.find_event(event.id).await.unwrap().unwrap();
    assert_eq!(retried.status, EventStatus::Pending);
    assert_eq!(retried.retry_count, 0);
}

#[tokio::test]
async fn cleanup_endpoint_deletes_old_events() {
    let (app, store, _billing) = test_app();

    let old = store
        .insert_event(propdesk_billing::NewWebhookEvent {
            event_type: "invoice.created".to_string(),
            source: EventSource::Stripe,
            payload: json!({}),
            created_at: OffsetDateTime::now_utc() - time::Duration::days(40),
        })
        .await
        .unwrap();
    store
        .insert_event(propdesk_billing::NewWebhookEvent {
            event_type: "invoice.created".to_string(),
            source: EventSource::Stripe,
            payload: json!({}),
            created_at: OffsetDateTime::now_utc() - time::Duration::days(5),
        })
        .await
        .unwrap();

    let response = app
        .oneshot(
            Request::builder()
                .method("POST")
                .uri("/admin/webhooks/cleanup?days=30")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "deleted_count": 1 }));
    assert!(store.find_event(old.id).await.unwrap().is_none());
}

#[tokio::test]
async fn health_endpoint_reports_ok() {
    let (app, _store, _billing) = test_app();

    let response = app
        .oneshot(
            Request::builder()
                .uri("/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "status": "ok" }));
}
