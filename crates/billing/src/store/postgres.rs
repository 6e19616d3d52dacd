//! Postgres store
//!
//! Production `Store` implementation over sqlx. Status enums are kept
//! as TEXT columns and parsed at the edge so the schema stays portable;
//! the invoice sequence uses an `invoice_counters` upsert so concurrent
//! same-year events can never allocate the same number.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::PgPool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{BillingError, BillingResult};
use crate::models::{
    EventSource, EventStatus, Invoice, InvoiceStatus, NewInvoice, NewSubscription,
    NewWebhookEvent, Subscription, SubscriptionChange, WebhookEvent,
};

use super::{EventFilter, Store};

/// `Store` backed by the application Postgres pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const EVENT_COLUMNS: &str =
    "id, event_type, source, payload, status, retry_count, error, created_at, processed_at";

const SUBSCRIPTION_COLUMNS: &str = "id, external_id, user_id, plan_id, status, billing_cycle, \
     current_period_start, current_period_end, next_billing_date, created_at, updated_at";

const INVOICE_COLUMNS: &str = "id, subscription_id, external_id, source, invoice_number, status, \
     amount_due_cents, amount_paid_cents, currency, period_start, period_end, due_date, paid_at, \
     line_items, created_at";

#[derive(sqlx::FromRow)]
struct EventRow {
    id: Uuid,
    event_type: String,
    source: String,
    payload: JsonValue,
    status: String,
    retry_count: i32,
    error: Option<String>,
    created_at: OffsetDateTime,
    processed_at: Option<OffsetDateTime>,
}

impl TryFrom<EventRow> for WebhookEvent {
    type Error = BillingError;

    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        Ok(WebhookEvent {
            id: row.id,
            event_type: row.event_type,
            source: row.source.parse().map_err(BillingError::Internal)?,
            payload: row.payload,
            status: row.status.parse().map_err(BillingError::Internal)?,
            retry_count: row.retry_count,
            error: row.error,
            created_at: row.created_at,
            processed_at: row.processed_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    id: Uuid,
    external_id: String,
    user_id: Uuid,
    plan_id: Option<String>,
    status: String,
    billing_cycle: String,
    current_period_start: Option<OffsetDateTime>,
    current_period_end: Option<OffsetDateTime>,
    next_billing_date: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl TryFrom<SubscriptionRow> for Subscription {
    type Error = BillingError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(Subscription {
            id: row.id,
            external_id: row.external_id,
            user_id: row.user_id,
            plan_id: row.plan_id,
            status: row.status.parse().map_err(BillingError::Internal)?,
            billing_cycle: row.billing_cycle,
            current_period_start: row.current_period_start,
            current_period_end: row.current_period_end,
            next_billing_date: row.next_billing_date,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct InvoiceRow {
    id: Uuid,
    subscription_id: Uuid,
    external_id: String,
    source: String,
    invoice_number: String,
    status: String,
    amount_due_cents: i64,
    amount_paid_cents: i64,
    currency: String,
    period_start: Option<OffsetDateTime>,
    period_end: Option<OffsetDateTime>,
    due_date: Option<OffsetDateTime>,
    paid_at: Option<OffsetDateTime>,
    line_items: JsonValue,
    created_at: OffsetDateTime,
}

impl TryFrom<InvoiceRow> for Invoice {
    type Error = BillingError;

    fn try_from(row: InvoiceRow) -> Result<Self, Self::Error> {
        let line_items = serde_json::from_value(row.line_items)
            .map_err(|e| BillingError::Internal(format!("corrupt invoice line items: {e}")))?;
        Ok(Invoice {
            id: row.id,
            subscription_id: row.subscription_id,
            external_id: row.external_id,
            source: row.source.parse().map_err(BillingError::Internal)?,
            invoice_number: row.invoice_number,
            status: row.status.parse().map_err(BillingError::Internal)?,
            amount_due_cents: row.amount_due_cents,
            amount_paid_cents: row.amount_paid_cents,
            currency: row.currency,
            period_start: row.period_start,
            period_end: row.period_end,
            due_date: row.due_date,
            paid_at: row.paid_at,
            line_items,
            created_at: row.created_at,
        })
    }
}

#[async_trait]
impl Store for PgStore {
    async fn insert_event(&self, event: NewWebhookEvent) -> BillingResult<WebhookEvent> {
        let row: EventRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO webhook_events (id, event_type, source, payload, status, retry_count, created_at)
            VALUES ($1, $2, $3, $4, 'pending', 0, $5)
            RETURNING {EVENT_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&event.event_type)
        .bind(event.source.as_str())
        .bind(&event.payload)
        .bind(event.created_at)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_event(&self, id: Uuid) -> BillingResult<Option<WebhookEvent>> {
        let row: Option<EventRow> = sqlx::query_as(&format!(
            "SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_event_status(
        &self,
        id: Uuid,
        status: EventStatus,
        error: Option<String>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = $2,
                error = $3,
                processed_at = CASE WHEN $2 IN ('processed', 'failed') THEN NOW()
                                    ELSE processed_at END,
                retry_count = CASE WHEN $2 = 'failed' THEN retry_count + 1
                                   ELSE retry_count END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(&error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn list_events(
        &self,
        filter: &EventFilter,
    ) -> BillingResult<(Vec<WebhookEvent>, u64)> {
        let status = filter.status.map(|s| s.as_str());
        let source = filter.source.map(|s| s.as_str());

        let (total,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM webhook_events
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR source = $2)
            "#,
        )
        .bind(status)
        .bind(source)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<EventRow> = sqlx::query_as(&format!(
            r#"
            SELECT {EVENT_COLUMNS} FROM webhook_events
            WHERE ($1::TEXT IS NULL OR status = $1)
              AND ($2::TEXT IS NULL OR source = $2)
            ORDER BY created_at DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(status)
        .bind(source)
        .bind(filter.limit as i64)
        .bind(filter.offset() as i64)
        .fetch_all(&self.pool)
        .await?;

        let events = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((events, total as u64))
    }

    async fn reset_failed_events(&self) -> BillingResult<u64> {
        let result = sqlx::query(
            r#"
            UPDATE webhook_events
            SET status = 'pending', retry_count = 0, error = NULL, processed_at = NULL
            WHERE status = 'failed'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn delete_events_before(&self, cutoff: OffsetDateTime) -> BillingResult<u64> {
        let result = sqlx::query("DELETE FROM webhook_events WHERE created_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    async fn insert_subscription(&self, sub: NewSubscription) -> BillingResult<Subscription> {
        let row: SubscriptionRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO subscriptions
                (id, external_id, user_id, plan_id, status, billing_cycle,
                 current_period_start, current_period_end, next_billing_date,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, NOW(), NOW())
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(&sub.external_id)
        .bind(sub.user_id)
        .bind(&sub.plan_id)
        .bind(sub.status.as_str())
        .bind(&sub.billing_cycle)
        .bind(sub.current_period_start)
        .bind(sub.current_period_end)
        .bind(sub.next_billing_date)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_subscription_by_id(&self, id: Uuid) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn find_subscription_by_external_id(
        &self,
        external_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            "SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE external_id = $1"
        ))
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_subscription(
        &self,
        id: Uuid,
        change: SubscriptionChange,
    ) -> BillingResult<Option<Subscription>> {
        let row: Option<SubscriptionRow> = sqlx::query_as(&format!(
            r#"
            UPDATE subscriptions
            SET status = COALESCE($2, status),
                next_billing_date = COALESCE($3, next_billing_date),
                plan_id = COALESCE($4, plan_id),
                current_period_start = COALESCE($5, current_period_start),
                current_period_end = COALESCE($6, current_period_end),
                updated_at = NOW()
            WHERE id = $1
            RETURNING {SUBSCRIPTION_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(change.status.map(|s| s.as_str()))
        .bind(change.next_billing_date)
        .bind(&change.plan_id)
        .bind(change.current_period_start)
        .bind(change.current_period_end)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn insert_invoice(&self, invoice: NewInvoice) -> BillingResult<Invoice> {
        let line_items = serde_json::to_value(&invoice.line_items)
            .map_err(|e| BillingError::Internal(format!("serialize line items: {e}")))?;

        let row: InvoiceRow = sqlx::query_as(&format!(
            r#"
            INSERT INTO invoices
                (id, subscription_id, external_id, source, invoice_number, status,
                 amount_due_cents, amount_paid_cents, currency,
                 period_start, period_end, due_date, line_items, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, NOW())
            RETURNING {INVOICE_COLUMNS}
            "#
        ))
        .bind(Uuid::new_v4())
        .bind(invoice.subscription_id)
        .bind(&invoice.external_id)
        .bind(invoice.source.as_str())
        .bind(&invoice.invoice_number)
        .bind(invoice.status.as_str())
        .bind(invoice.amount_due_cents)
        .bind(invoice.amount_paid_cents)
        .bind(&invoice.currency)
        .bind(invoice.period_start)
        .bind(invoice.period_end)
        .bind(invoice.due_date)
        .bind(&line_items)
        .fetch_one(&self.pool)
        .await?;

        row.try_into()
    }

    async fn find_invoice_by_external_id(
        &self,
        source: EventSource,
        external_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        let row: Option<InvoiceRow> = sqlx::query_as(&format!(
            "SELECT {INVOICE_COLUMNS} FROM invoices WHERE source = $1 AND external_id = $2"
        ))
        .bind(source.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update_invoice_status(
        &self,
        id: Uuid,
        status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<()> {
        sqlx::query(
            r#"
            UPDATE invoices
            SET status = $2,
                paid_at = CASE WHEN $2 = 'paid' THEN COALESCE($3, NOW()) ELSE paid_at END,
                amount_paid_cents = CASE WHEN $2 = 'paid' THEN amount_due_cents
                                         ELSE amount_paid_cents END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(paid_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn next_invoice_sequence(&self, year: i32) -> BillingResult<i64> {
        // Upsert keeps the allocation atomic: the insert path seeds the
        // counter from invoices already numbered for the year, the
        // conflict path increments under row-level locking.
        let (value,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO invoice_counters (year, value)
            VALUES ($1, (
                SELECT COALESCE(MAX(SPLIT_PART(invoice_number, '-', 3)::BIGINT), 0) + 1
                FROM invoices
                WHERE invoice_number LIKE 'INV-' || $1::TEXT || '-%'
            ))
            ON CONFLICT (year) DO UPDATE SET value = invoice_counters.value + 1
            RETURNING value
            "#,
        )
        .bind(year)
        .fetch_one(&self.pool)
        .await?;

        Ok(value)
    }
}
