//! In-memory store
//!
//! Backs the test suite and local development without a database.
//! A single `RwLock` over all tables keeps the same atomicity the
//! Postgres implementation provides per statement; in particular the
//! invoice sequence is allocated under the write lock.

use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    EventSource, EventStatus, Invoice, InvoiceStatus, NewInvoice, NewSubscription,
    NewWebhookEvent, Subscription, SubscriptionChange, WebhookEvent,
};

use super::{EventFilter, Store};

#[derive(Default)]
struct Tables {
    events: Vec<WebhookEvent>,
    subscriptions: Vec<Subscription>,
    invoices: Vec<Invoice>,
    invoice_counters: HashMap<i32, i64>,
}

/// Non-durable `Store` implementation.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_event(&self, event: NewWebhookEvent) -> BillingResult<WebhookEvent> {
        let row = WebhookEvent {
            id: Uuid::new_v4(),
            event_type: event.event_type,
            source: event.source,
            payload: event.payload,
            status: EventStatus::Pending,
            retry_count: 0,
            error: None,
            created_at: event.created_at,
            processed_at: None,
        };
        self.inner.write().await.events.push(row.clone());
        Ok(row)
    }

    async fn find_event(&self, id: Uuid) -> BillingResult<Option<WebhookEvent>> {
        let tables = self.inner.read().await;
        Ok(tables.events.iter().find(|e| e.id == id).cloned())
    }

    async fn update_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error: Option<String>,
    ) -> BillingResult<()> {
        let mut tables = self.inner.write().await;
        if let Some(event) = tables.events.iter_mut().find(|e| e.id == id) {
            event.status = status;
            event.error = error;
            match status {
                EventStatus::Processed | EventStatus::Failed => {
                    event.processed_at = Some(OffsetDateTime::now_utc());
                    if status == EventStatus::Failed {
                        event.retry_count += 1;
                    }
                }
                EventStatus::Pending | EventStatus::Processing => {}
            }
        }
        Ok(())
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
    ) -> BillingResult<(Vec<WebhookEvent>, u64)> {
        let tables = self.inner.read().await;
        let mut matching: Vec<WebhookEvent> = tables
            .events
            .iter()
            .filter(|e| filter.status.is_none_or(|s| e.status == s))
            .filter(|e| filter.source.is_none_or(|s| e.source == s))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len() as u64;
        let page = matching
            .into_iter()
            .skip(filter.offset() as usize)
            .take(filter.limit as usize)
            .collect();
        Ok((page, total))
    }

    async fn reset_failed_events(&self) -> BillingResult<u64> {
        let mut tables = self.inner.write().await;
        let mut affected = 0u64;
        for event in tables
            .events
            .iter_mut()
            .filter(|e| e.status == EventStatus::Failed)
        {
            event.status = EventStatus::Pending;
            event.retry_count = 0;
            event.error = None;
            event.processed_at = None;
            affected += 1;
        }
        Ok(affected)
    }

    async fn delete_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let mut tables = self.inner.write().await;
        let before = tables.events.len();
        tables.events.retain(|e| e.created_at >= cutoff);
        Ok((before - tables.events.len()) as u64)
    }

    async fn insert_subscription(&self, sub: NewSubscription) -> BillingResult<Subscription> {
        let mut tables = self.inner.write().await;
        if tables
            .subscriptions
            .iter()
            .any(|s| s.external_id == sub.external_id)
        {
            return Err(BillingError::Database(format!(
                "duplicate subscription external_id: {}",
                sub.external_id
            )));
        }
        let now = OffsetDateTime::now_utc();
        let row = Subscription {
            id: Uuid::new_v4(),
            external_id: sub.external_id,
            user_id: sub.user_id,
            plan_id: sub.plan_id,
            status: sub.status,
            billing_cycle: sub.billing_cycle,
            current_period_start: sub.current_period_start,
            current_period_end: sub.current_period_end,
            next_billing_date: sub.next_billing_date,
            created_at: now,
            updated_at: now,
        };
        tables.subscriptions.push(row.clone());
        Ok(row)
    }

    async fn find_subscription_by_id(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let tables = self.inner.read().await;
        Ok(tables.subscriptions.iter().find(|s| s.id == id).cloned())
    }

    async fn find_subscription_by_external_id(
        &self,
        external_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let tables = self.inner.read().await;
        Ok(tables
            .subscriptions
            .iter()
            .find(|s| s.external_id == external_id)
            .cloned())
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        change: SubscriptionChange,
    ) -> BillingResult<Option<Subscription>> {
        let mut tables = self.inner.write().await;
        let Some(sub) = tables.subscriptions.iter_mut().find(|s| s.id == id) else {
            return Ok(None);
        };
        if let Some(status) = change.status {
            sub.status = status;
        }
        if let Some(next_billing) = change.next_billing_date {
            sub.next_billing_date = Some(next_billing);
        }
        if let Some(plan_id) = change.plan_id {
            sub.plan_id = Some(plan_id);
        }
        if let Some(start) = change.current_period_start {
            sub.current_period_start = Some(start);
        }
        if let Some(end) = change.current_period_end {
            sub.current_period_end = Some(end);
        }
        sub.updated_at = OffsetDateTime::now_utc();
        Ok(Some(sub.clone()))
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice> {
        let mut tables = self.inner.write().await;
        if tables
            .invoices
            .iter()
            .any(|i| i.source == invoice.source && i.external_id == invoice.external_id)
        {
            return Err(BillingError::Database(format!(
                "duplicate invoice external_id for {}: {}",
                invoice.source, invoice.external_id
            )));
        }
        let row = Invoice {
            id: Uuid::new_v4(),
            subscription_id: invoice.subscription_id,
            external_id: invoice.external_id,
            source: invoice.source,
            invoice_number: invoice.invoice_number,
            status: invoice.status,
            amount_due_cents: invoice.amount_due_cents,
            amount_paid_cents: invoice.amount_paid_cents,
            currency: invoice.currency,
            period_start: invoice.period_start,
            period_end: invoice.period_end,
            due_date: invoice.due_date,
            paid_at: None,
            line_items: invoice.line_items,
            created_at: OffsetDateTime::now_utc(),
        };
        tables.invoices.push(row.clone());
        Ok(row)
    }

    async fn find_invoice_by_external_id(
        &self,
        source: EventSource,
        external_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        let tables = self.inner.read().await;
        Ok(tables
            .invoices
            .iter()
            .find(|i| i.source == source && i.external_id == external_id)
            .cloned())
    }

    async fn update_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<()> {
        let mut tables = self.inner.write().await;
        if let Some(invoice) = tables.invoices.iter_mut().find(|i| i.id == id) {
            invoice.status = status;
            if status == InvoiceStatus::Paid {
                invoice.paid_at = paid_at.or(Some(OffsetDateTime::now_utc()));
                invoice.amount_paid_cents = invoice.amount_due_cents;
            }
        }
        Ok(())
    }

    async fn next_invoice_sequence(&self, year: i32) -> BillingResult<i64> {
        let mut tables = self.inner.write().await;

        // Seed the counter from invoices already present for the year,
        // so numbering continues after existing documents.
        let prefix = format!("INV-{year}-");
        let seed = tables
            .invoices
            .iter()
            .filter_map(|i| i.invoice_number.strip_prefix(&prefix))
            .filter_map(|seq| seq.parse::<i64>().ok())
            .max()
            .unwrap_or(0);

        let counter = tables.invoice_counters.entry(year).or_insert(seed);
        *counter = (*counter).max(seed) + 1;
        Ok(*counter)
    }
}
