//! Persistence capability
//!
//! The reconciliation logic is written against the `Store` trait so it
//! stays portable across storage backends: `PgStore` is the production
//! Postgres implementation, `MemoryStore` backs the test suite. The
//! trait exposes plain insert/update/select/delete operations plus one
//! atomic primitive, `next_invoice_sequence`, which replaces the racy
//! count-then-insert invoice numbering of earlier revisions.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{
    EventSource, EventStatus, Invoice, InvoiceStatus, NewInvoice, NewSubscription,
    NewWebhookEvent, Subscription, SubscriptionChange, WebhookEvent,
};

/// Filter and page request for the event listing.
#[derive(Debug, Clone)]
pub struct EventFilter {
    pub status: Option<EventStatus>,
    pub source: Option<EventSource>,
    pub page: u32,
    pub limit: u32,
}

impl Default for EventFilter {
    fn default() -> Self {
        Self {
            status: None,
            source: None,
            page: 1,
            limit: 20,
        }
    }
}

impl EventFilter {
    pub fn offset(&self) -> u64 {
        (self.page.max(1) as u64 - 1) * self.limit as u64
    }
}

/// Storage operations the billing core depends on.
///
/// Semantics are synchronous request/response; no multi-statement
/// transactions are exposed. Read-then-write sequences above this
/// trait are therefore only safe under low concurrency per external
/// id, which matches the one-request-per-invocation deployment model.
#[async_trait]
pub trait Store: Send + Sync {
    // --- webhook events -------------------------------------------------

    async fn insert_event(&self, event: NewWebhookEvent) -> BillingResult<WebhookEvent>;

    async fn find_event(&self, id: Uuid) -> BillingResult<Option<WebhookEvent>>;

    /// Set status (and processed_at / error) on an event row.
    /// Re-marking an already-processed event is harmless.
    async fn update_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error: Option<String>,
    ) -> BillingResult<()>;

    /// Newest-first page of events plus the total matching count.
    async fn list_events(
        &self,
        filter: &EventFilter,
    ) -> BillingResult<(Vec<WebhookEvent>, u64)>;

    /// Bulk reset failed events to pending with retry_count 0.
    /// Returns the number of rows affected.
    async fn reset_failed_events(&self) -> BillingResult<u64>;

    /// Delete events created before `cutoff`, regardless of status.
    /// Returns rows deleted.
    async fn delete_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64>;

    // --- subscriptions --------------------------------------------------

    async fn insert_subscription(&self, sub: NewSubscription) -> BillingResult<Subscription>;

    async fn find_subscription_by_id(&self, id: Uuid) -> BillingResult<Option<Subscription>>;

    async fn find_subscription_by_external_id(
        &self,
        external_id: &str,
    ) -> BillingResult<Option<Subscription>>;

    /// Apply a partial update; last write wins. Returns the updated
    /// row, or `None` if the id does not exist.
    async fn update_subscription(
        &self,
        id: Uuid,
        change: SubscriptionChange,
    ) -> BillingResult<Option<Subscription>>;

    // --- invoices -------------------------------------------------------

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice>;

    async fn find_invoice_by_external_id(
        &self,
        source: EventSource,
        external_id: &str,
    ) -> BillingResult<Option<Invoice>>;

    async fn update_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<()>;

    /// Allocate the next invoice sequence number for `year`.
    ///
    /// Atomic within the store: concurrent callers in the same year
    /// receive distinct values. Seeded from invoices already present
    /// so numbering continues from existing `INV-<year>-` documents.
    async fn next_invoice_sequence(&self, year: i32) -> BillingResult<i64>;
}
