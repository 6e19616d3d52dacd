//! Invoice state updater
//!
//! Creates invoice documents from invoice-created and renewal events
//! and drives the terminal `paid` / `payment_failed` transitions.
//! Invoice numbers are `INV-<year>-<NNN>`, allocated from the store's
//! atomic per-year sequence.

use std::sync::Arc;

use time::OffsetDateTime;

use crate::error::BillingResult;
use crate::models::{
    EventSource, Invoice, InvoiceLineItem, InvoiceStatus, NewInvoice,
};
use crate::store::Store;
use crate::subscriptions::SubscriptionService;

/// Neutral invoice fields extracted from a provider event.
#[derive(Debug, Clone)]
pub struct InvoiceEventData {
    pub external_id: String,
    pub subscription_external_id: String,
    pub amount_due_cents: i64,
    pub currency: String,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub due_date: Option<OffsetDateTime>,
    pub line_items: Vec<InvoiceLineItem>,
}

#[derive(Clone)]
pub struct InvoiceService {
    store: Arc<dyn Store>,
    subscriptions: SubscriptionService,
}

impl InvoiceService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        let subscriptions = SubscriptionService::new(store.clone());
        Self {
            store,
            subscriptions,
        }
    }

    /// Create a pending invoice from an event.
    ///
    /// Returns `None` without side effects when the referenced
    /// subscription does not exist (one-off invoices precede
    /// subscription creation) and when the provider invoice id was
    /// already stored (providers deliver at least once).
    pub async fn create_from_event(
        &self,
        source: EventSource,
        data: InvoiceEventData,
    ) -> BillingResult<Option<Invoice>> {
        if let Some(existing) = self
            .store
            .find_invoice_by_external_id(source, &data.external_id)
            .await?
        {
            tracing::info!(
                invoice_id = %existing.id,
                external_id = %data.external_id,
                "Invoice already recorded, skipping duplicate event"
            );
            return Ok(Some(existing));
        }

        let Some(subscription) = self
            .subscriptions
            .find_by_external_id(&data.subscription_external_id)
            .await?
        else {
            tracing::warn!(
                subscription_external_id = %data.subscription_external_id,
                invoice_external_id = %data.external_id,
                "No subscription for invoice event, skipping"
            );
            return Ok(None);
        };

        let invoice_number = self.next_invoice_number().await?;

        let invoice = self
            .store
            .insert_invoice(NewInvoice {
                subscription_id: subscription.id,
                external_id: data.external_id,
                source,
                invoice_number,
                status: InvoiceStatus::Pending,
                amount_due_cents: data.amount_due_cents,
                amount_paid_cents: 0,
                currency: data.currency,
                period_start: data.period_start,
                period_end: data.period_end,
                due_date: data.due_date,
                line_items: data.line_items,
            })
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            subscription_id = %subscription.id,
            amount_due_cents = invoice.amount_due_cents,
            "Invoice created"
        );
        Ok(Some(invoice))
    }

    /// Terminal transition pending -> paid. Missing invoice is a
    /// no-op; a repeated paid event is acknowledged without change.
    pub async fn mark_paid(
        &self,
        source: EventSource,
        external_id: &str,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<Option<Invoice>> {
        self.transition(source, external_id, InvoiceStatus::Paid, paid_at)
            .await
    }

    /// Terminal transition pending -> payment_failed.
    pub async fn mark_payment_failed(
        &self,
        source: EventSource,
        external_id: &str,
    ) -> BillingResult<Option<Invoice>> {
        self.transition(source, external_id, InvoiceStatus::PaymentFailed, None)
            .await
    }

    async fn transition(
        &self,
        source: EventSource,
        external_id: &str,
        new_status: InvoiceStatus,
        paid_at: Option<OffsetDateTime>,
    ) -> BillingResult<Option<Invoice>> {
        let Some(invoice) = self
            .store
            .find_invoice_by_external_id(source, external_id)
            .await?
        else {
            tracing::warn!(
                external_id = %external_id,
                requested_status = %new_status,
                "Invoice not found for event, skipping"
            );
            return Ok(None);
        };

        if invoice.status.is_terminal() {
            if invoice.status != new_status {
                tracing::warn!(
                    invoice_id = %invoice.id,
                    current_status = %invoice.status,
                    requested_status = %new_status,
                    "Invoice already in terminal status, ignoring transition"
                );
            }
            return Ok(Some(invoice));
        }

        self.store
            .update_invoice_status(invoice.id, new_status, paid_at)
            .await?;

        tracing::info!(
            invoice_id = %invoice.id,
            invoice_number = %invoice.invoice_number,
            status = %new_status,
            "Invoice status updated"
        );

        self.store
            .find_invoice_by_external_id(source, external_id)
            .await
    }

    /// Allocate the next `INV-<year>-<NNN>` number for the current
    /// year. The sequence itself is atomic inside the store.
    async fn next_invoice_number(&self) -> BillingResult<String> {
        let year = OffsetDateTime::now_utc().year();
        let sequence = self.store.next_invoice_sequence(year).await?;
        Ok(format_invoice_number(year, sequence))
    }
}

/// `INV-2024-003` style document numbers; the sequence is zero-padded
/// to three digits but keeps growing past 999.
pub fn format_invoice_number(year: i32, sequence: i64) -> String {
    format!("INV-{year}-{sequence:03}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invoice_numbers_are_zero_padded() {
        assert_eq!(format_invoice_number(2024, 1), "INV-2024-001");
        assert_eq!(format_invoice_number(2024, 42), "INV-2024-042");
        assert_eq!(format_invoice_number(2025, 1000), "INV-2025-1000");
    }
}
