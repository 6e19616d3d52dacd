// Billing crate clippy configuration
// Test code patterns (expected in test files):
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! PropDesk Billing Module
//!
//! Payment provider webhook ingestion and reconciliation for
//! subscriptions and invoices.
//!
//! ## Features
//!
//! - **Event Log**: Append-only record of every inbound provider call
//! - **Webhooks**: Verified ingestion for Stripe, unsigned for Iyzico
//! - **Subscriptions**: Status state machine driven by provider events
//! - **Invoices**: Pending/paid/payment_failed documents with
//!   `INV-<year>-<NNN>` numbering
//! - **Maintenance**: Failed-event retry and processed-event cleanup

pub mod error;
pub mod events;
pub mod invoices;
pub mod maintenance;
pub mod models;
pub mod store;
pub mod subscriptions;
pub mod webhooks;


pub use error::{BillingError, BillingResult};
pub use events::{EventLog, EventPage};
pub use invoices::{format_invoice_number, InvoiceEventData, InvoiceService};
pub use maintenance::{CleanupOutcome, MaintenanceService, RetryOutcome};
pub use models::{
    EventSource, EventStatus, Invoice, InvoiceLineItem, InvoiceStatus, NewInvoice,
    NewSubscription, NewWebhookEvent, Subscription, SubscriptionChange, SubscriptionStatus,
    WebhookEvent,
};
pub use store::{EventFilter, MemoryStore, PgStore, Store};
pub use subscriptions::{StatusExtra, SubscriptionEventData, SubscriptionService};
pub use webhooks::{WebhookConfig, WebhookHandler};

use std::sync::Arc;

use sqlx::PgPool;

/// Aggregate entry point wiring every billing service over one store.
#[derive(Clone)]
pub struct BillingService {
    pub events: EventLog,
    pub subscriptions: SubscriptionService,
    pub invoices: InvoiceService,
    pub webhooks: Arc<WebhookHandler>,
    pub maintenance: MaintenanceService,
}

impl BillingService {
    pub fn new(store: Arc<dyn Store>, config: WebhookConfig) -> Self {
        Self {
            events: EventLog::new(store.clone()),
            subscriptions: SubscriptionService::new(store.clone()),
            invoices: InvoiceService::new(store.clone()),
            webhooks: Arc::new(WebhookHandler::new(store.clone(), config)),
            maintenance: MaintenanceService::new(store),
        }
    }

    pub fn from_pool(pool: PgPool, config: WebhookConfig) -> Self {
        Self::new(Arc::new(PgStore::new(pool)), config)
    }
}
