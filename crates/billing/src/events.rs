//! Webhook event log
//!
//! Append-only record of every inbound provider call. The row is
//! inserted before any routing happens; if the insert fails the whole
//! request fails and nothing downstream runs.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use uuid::Uuid;

use propdesk_shared::Pagination;

use crate::error::BillingResult;
use crate::models::{EventSource, EventStatus, NewWebhookEvent, WebhookEvent};
use crate::store::{EventFilter, Store};

/// One page of the event listing.
#[derive(Debug, Clone, Serialize)]
pub struct EventPage {
    pub events: Vec<WebhookEvent>,
    pub pagination: Pagination,
}

/// Durable event log over the storage capability.
#[derive(Clone)]
pub struct EventLog {
    store: Arc<dyn Store>,
}

impl EventLog {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Insert a pending event row for an inbound call.
    ///
    /// Must succeed before routing proceeds; a store failure here
    /// propagates and the request fails with an internal error.
    pub async fn record(
        &self,
        event_type: &str,
        payload: JsonValue,
        source: EventSource,
    ) -> BillingResult<WebhookEvent> {
        let event = self
            .store
            .insert_event(NewWebhookEvent {
                event_type: event_type.to_string(),
                source,
                payload,
                created_at: OffsetDateTime::now_utc(),
            })
            .await?;

        tracing::debug!(
            event_id = %event.id,
            event_type = %event.event_type,
            source = %event.source,
            "Webhook event recorded"
        );
        Ok(event)
    }

    /// Claim the event for processing.
    pub async fn mark_processing(&self, id: Uuid) -> BillingResult<()> {
        self.store
            .update_event_status(id, EventStatus::Processing, None)
            .await
    }

    /// Mark processed. Idempotent: re-marking an already-processed
    /// event leaves it processed.
    pub async fn mark_processed(&self, id: Uuid) -> BillingResult<()> {
        self.store
            .update_event_status(id, EventStatus::Processed, None)
            .await
    }

    /// Mark failed with the handler error. The row is kept for the
    /// retry utility; it is never rolled back.
    pub async fn mark_failed(&self, id: Uuid, error: &str) -> BillingResult<()> {
        self.store
            .update_event_status(id, EventStatus::Failed, Some(error.to_string()))
            .await
    }

    /// Newest-first paginated listing with optional status/source
    /// filters. `limit` is clamped to 100.
    pub async fn list(&self, mut filter: EventFilter) -> BillingResult<EventPage> {
        filter.page = filter.page.max(1);
        filter.limit = filter.limit.clamp(1, 100);

        let (events, total) = self.store.list_events(&filter).await?;
        Ok(EventPage {
            events,
            pagination: Pagination::new(filter.page, filter.limit, total),
        })
    }
}
