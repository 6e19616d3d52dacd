//! Payment provider webhook handling
//!
//! Ingress, routing, and reconciliation for Stripe and Iyzico events.
//! The flow per inbound call is fixed: verify transport authenticity
//! (Stripe only), parse the payload, append the event log row, then
//! dispatch by event type and mark the row processed or failed.
//! Unknown event types are acknowledged without action so providers
//! do not retry them.

use std::collections::HashMap;
use std::sync::Arc;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use sha2::Sha256;
use time::OffsetDateTime;

use crate::error::{BillingError, BillingResult};
use crate::events::EventLog;
use crate::invoices::{InvoiceEventData, InvoiceService};
use crate::models::{EventSource, InvoiceLineItem, SubscriptionStatus, WebhookEvent};
use crate::store::Store;
use crate::subscriptions::{StatusExtra, SubscriptionEventData, SubscriptionService};

type HmacSha256 = Hmac<Sha256>;

/// Webhook verification settings.
#[derive(Debug, Clone)]
pub struct WebhookConfig {
    /// Stripe signing secret (`whsec_...`).
    pub stripe_webhook_secret: String,
    /// Maximum accepted signature timestamp skew, in seconds.
    pub signature_tolerance_secs: i64,
}

impl WebhookConfig {
    pub fn new(stripe_webhook_secret: impl Into<String>) -> Self {
        Self {
            stripe_webhook_secret: stripe_webhook_secret.into(),
            signature_tolerance_secs: 300,
        }
    }
}

/// Webhook handler for payment provider events.
pub struct WebhookHandler {
    events: EventLog,
    subscriptions: SubscriptionService,
    invoices: InvoiceService,
    config: WebhookConfig,
}

impl WebhookHandler {
    pub fn new(store: Arc<dyn Store>, config: WebhookConfig) -> Self {
        Self {
            events: EventLog::new(store.clone()),
            subscriptions: SubscriptionService::new(store.clone()),
            invoices: InvoiceService::new(store),
            config,
        }
    }

    /// Verify a Stripe signature header against the raw payload.
    ///
    /// Header format: `t=<unix>,v1=<hex hmac>[,v0=...]`. The HMAC is
    /// SHA-256 over `"{t}.{payload}"` keyed with the signing secret
    /// (the `whsec_` prefix is not part of the key). Timestamps
    /// outside the tolerance window are rejected to block replays.
    pub fn verify_stripe_signature(&self, payload: &str, signature: &str) -> BillingResult<()> {
        let mut timestamp: Option<i64> = None;
        let mut v1_signature: Option<&str> = None;

        for part in signature.split(',') {
            match part.split_once('=') {
                Some(("t", value)) => timestamp = value.parse().ok(),
                Some(("v1", value)) => v1_signature = Some(value),
                _ => {}
            }
        }

        let timestamp = timestamp.ok_or_else(|| {
            tracing::warn!("Missing timestamp in stripe-signature header");
            BillingError::SignatureInvalid
        })?;
        let v1_signature = v1_signature.ok_or_else(|| {
            tracing::warn!("Missing v1 signature in stripe-signature header");
            BillingError::SignatureInvalid
        })?;

        let now = OffsetDateTime::now_utc().unix_timestamp();
        if (now - timestamp).abs() > self.config.signature_tolerance_secs {
            tracing::warn!(
                timestamp = timestamp,
                now = now,
                "Webhook signature timestamp outside tolerance"
            );
            return Err(BillingError::SignatureInvalid);
        }

        let secret_key = self
            .config
            .stripe_webhook_secret
            .strip_prefix("whsec_")
            .unwrap_or(&self.config.stripe_webhook_secret);
        let signed_payload = format!("{timestamp}.{payload}");

        let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
            .map_err(|_| BillingError::SignatureInvalid)?;
        mac.update(signed_payload.as_bytes());
        let computed = hex::encode(mac.finalize().into_bytes());

        if computed != v1_signature {
            tracing::warn!("Webhook signature mismatch");
            return Err(BillingError::SignatureInvalid);
        }

        Ok(())
    }

    /// Full ingestion pipeline for one inbound call:
    /// verify -> parse -> log -> route -> mark processed/failed.
    ///
    /// Nothing is persisted when verification or parsing fails. Once
    /// the event row exists it is never rolled back: a handler error
    /// marks it `failed` (with the error string) and propagates, and
    /// the retry utility can make it eligible again later.
    pub async fn ingest(
        &self,
        source: EventSource,
        payload: &str,
        signature: Option<&str>,
    ) -> BillingResult<WebhookEvent> {
        if source == EventSource::Stripe {
            let signature = signature.ok_or(BillingError::MissingSignature)?;
            self.verify_stripe_signature(payload, signature)?;
        }

        let body: JsonValue = serde_json::from_str(payload)?;
        let event_type = extract_event_type(source, &body)?;

        let event = self.events.record(&event_type, body.clone(), source).await?;
        self.events.mark_processing(event.id).await?;

        tracing::info!(
            event_id = %event.id,
            event_type = %event_type,
            source = %source,
            "Processing webhook event"
        );

        match self.process_event(source, &event_type, &body).await {
            Ok(()) => {
                self.events.mark_processed(event.id).await?;
                Ok(event)
            }
            Err(e) => {
                if let Err(mark_err) = self.events.mark_failed(event.id, &e.to_string()).await {
                    tracing::error!(
                        event_id = %event.id,
                        error = %mark_err,
                        "Failed to mark webhook event as failed"
                    );
                }
                Err(e)
            }
        }
    }

    /// Dispatch by provider-specific event type.
    async fn process_event(
        &self,
        source: EventSource,
        event_type: &str,
        body: &JsonValue,
    ) -> BillingResult<()> {
        match (source, event_type) {
            (EventSource::Stripe, "customer.subscription.created") => {
                self.handle_stripe_subscription_created(body).await
            }
            (EventSource::Stripe, "customer.subscription.deleted") => {
                self.handle_stripe_subscription_deleted(body).await
            }
            (EventSource::Stripe, "invoice.created") => {
                self.handle_stripe_invoice_created(body).await
            }
            (EventSource::Stripe, "invoice.payment_succeeded") => {
                self.handle_stripe_invoice_payment_succeeded(body).await
            }
            (EventSource::Stripe, "invoice.payment_failed") => {
                self.handle_stripe_invoice_payment_failed(body).await
            }
            (EventSource::Iyzico, "SUBSCRIPTION_RENEWED") => {
                self.handle_iyzico_subscription_renewed(body).await
            }
            (EventSource::Iyzico, "SUBSCRIPTION_CANCELLED") => {
                self.handle_iyzico_subscription_cancelled(body).await
            }
            (EventSource::Iyzico, "INVOICE_CREATED") => {
                self.handle_iyzico_invoice_created(body).await
            }
            (EventSource::Iyzico, "PAYMENT_FAILED") => {
                self.handle_iyzico_payment_failed(body).await
            }
            _ => {
                // Acknowledge unhandled types so the provider does not
                // retry them; the event row stays for inspection.
                tracing::info!(
                    source = %source,
                    event_type = %event_type,
                    "Received unhandled webhook event type - no handler configured"
                );
                Ok(())
            }
        }
    }

    // ============ STRIPE HANDLERS ============

    async fn handle_stripe_subscription_created(&self, body: &JsonValue) -> BillingResult<()> {
        let object: StripeSubscription = extract_stripe_object(body)?;
        let user_id = object
            .metadata
            .get("user_id")
            .and_then(|v| v.parse().ok())
            .ok_or_else(|| {
                BillingError::InvalidPayload(
                    "subscription event missing user_id metadata".to_string(),
                )
            })?;

        let status = object
            .status
            .as_deref()
            .map(map_stripe_subscription_status)
            .unwrap_or(SubscriptionStatus::Active);
        let billing_cycle = match object.plan.as_ref().and_then(|p| p.interval.as_deref()) {
            Some("year") => "yearly".to_string(),
            _ => "monthly".to_string(),
        };

        self.subscriptions
            .create_from_event(SubscriptionEventData {
                external_id: object.id,
                user_id,
                plan_id: object.metadata.get("plan_id").cloned(),
                status,
                billing_cycle,
                period_start: object.current_period_start.and_then(from_unix),
                period_end: object.current_period_end.and_then(from_unix),
                next_billing_date: object.current_period_end.and_then(from_unix),
            })
            .await?;
        Ok(())
    }

    async fn handle_stripe_subscription_deleted(&self, body: &JsonValue) -> BillingResult<()> {
        let object: StripeSubscription = extract_stripe_object(body)?;
        self.subscriptions.cancel(&object.id).await?;
        Ok(())
    }

    async fn handle_stripe_invoice_created(&self, body: &JsonValue) -> BillingResult<()> {
        let object: StripeInvoice = extract_stripe_object(body)?;
        let Some(subscription_id) = object.subscription.clone() else {
            tracing::info!(
                invoice_id = %object.id,
                "Stripe invoice without subscription reference, skipping"
            );
            return Ok(());
        };

        self.invoices
            .create_from_event(
                EventSource::Stripe,
                InvoiceEventData {
                    external_id: object.id.clone(),
                    subscription_external_id: subscription_id,
                    amount_due_cents: object.amount_due.unwrap_or(0),
                    currency: object.currency.clone().unwrap_or_else(|| "usd".to_string()),
                    period_start: object.period_start.and_then(from_unix),
                    period_end: object.period_end.and_then(from_unix),
                    due_date: object.due_date.and_then(from_unix),
                    line_items: object.line_items(),
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_stripe_invoice_payment_succeeded(
        &self,
        body: &JsonValue,
    ) -> BillingResult<()> {
        let object: StripeInvoice = extract_stripe_object(body)?;

        self.invoices
            .mark_paid(EventSource::Stripe, &object.id, None)
            .await?;

        if let Some(subscription_id) = &object.subscription {
            self.subscriptions
                .apply_event_status(
                    subscription_id,
                    SubscriptionStatus::Active,
                    StatusExtra {
                        next_billing_date: object.period_end.and_then(from_unix),
                        ..StatusExtra::default()
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_stripe_invoice_payment_failed(&self, body: &JsonValue) -> BillingResult<()> {
        let object: StripeInvoice = extract_stripe_object(body)?;

        self.invoices
            .mark_payment_failed(EventSource::Stripe, &object.id)
            .await?;

        if let Some(subscription_id) = &object.subscription {
            self.subscriptions
                .apply_event_status(
                    subscription_id,
                    SubscriptionStatus::PastDue,
                    StatusExtra::default(),
                )
                .await?;
        }
        Ok(())
    }

    // ============ IYZICO HANDLERS ============

    async fn handle_iyzico_subscription_renewed(&self, body: &JsonValue) -> BillingResult<()> {
        let data: IyzicoSubscriptionData = extract_iyzico_data(body)?;

        self.subscriptions
            .apply_event_status(
                &data.subscription_reference_code,
                SubscriptionStatus::Active,
                StatusExtra {
                    next_billing_date: data.end_date.and_then(from_unix),
                    current_period_start: data.start_date.and_then(from_unix),
                    current_period_end: data.end_date.and_then(from_unix),
                    ..StatusExtra::default()
                },
            )
            .await?;

        // Renewals carry the new period's invoice inline.
        if let Some(invoice) = data.invoice {
            let amount_due_cents = invoice.amount_cents();
            self.invoices
                .create_from_event(
                    EventSource::Iyzico,
                    InvoiceEventData {
                        external_id: invoice.reference_code,
                        subscription_external_id: data.subscription_reference_code,
                        amount_due_cents,
                        currency: invoice.currency_code.unwrap_or_else(|| "try".to_string()),
                        period_start: data.start_date.and_then(from_unix),
                        period_end: data.end_date.and_then(from_unix),
                        due_date: None,
                        line_items: Vec::new(),
                    },
                )
                .await?;
        }
        Ok(())
    }

    async fn handle_iyzico_subscription_cancelled(&self, body: &JsonValue) -> BillingResult<()> {
        let data: IyzicoSubscriptionData = extract_iyzico_data(body)?;
        self.subscriptions
            .cancel(&data.subscription_reference_code)
            .await?;
        Ok(())
    }

    async fn handle_iyzico_invoice_created(&self, body: &JsonValue) -> BillingResult<()> {
        let data: IyzicoSubscriptionData = extract_iyzico_data(body)?;
        let Some(invoice) = data.invoice else {
            return Err(BillingError::InvalidPayload(
                "INVOICE_CREATED event without invoice data".to_string(),
            ));
        };

        let amount_due_cents = invoice.amount_cents();
        self.invoices
            .create_from_event(
                EventSource::Iyzico,
                InvoiceEventData {
                    external_id: invoice.reference_code,
                    subscription_external_id: data.subscription_reference_code,
                    amount_due_cents,
                    currency: invoice.currency_code.unwrap_or_else(|| "try".to_string()),
                    period_start: data.start_date.and_then(from_unix),
                    period_end: data.end_date.and_then(from_unix),
                    due_date: None,
                    line_items: Vec::new(),
                },
            )
            .await?;
        Ok(())
    }

    async fn handle_iyzico_payment_failed(&self, body: &JsonValue) -> BillingResult<()> {
        let data: IyzicoSubscriptionData = extract_iyzico_data(body)?;

        if let Some(invoice) = &data.invoice {
            self.invoices
                .mark_payment_failed(EventSource::Iyzico, &invoice.reference_code)
                .await?;
        }

        self.subscriptions
            .apply_event_status(
                &data.subscription_reference_code,
                SubscriptionStatus::PastDue,
                StatusExtra::default(),
            )
            .await?;
        Ok(())
    }
}

/// Pull the provider's event type string out of the raw body.
fn extract_event_type(source: EventSource, body: &JsonValue) -> BillingResult<String> {
    let field = match source {
        EventSource::Stripe => "type",
        EventSource::Iyzico => "eventType",
    };
    body.get(field)
        .and_then(JsonValue::as_str)
        .map(str::to_string)
        .ok_or_else(|| BillingError::InvalidPayload(format!("missing {field} field")))
}

/// Deserialize `data.object` of a Stripe event envelope.
fn extract_stripe_object<T: for<'de> Deserialize<'de>>(body: &JsonValue) -> BillingResult<T> {
    let object = body
        .get("data")
        .and_then(|d| d.get("object"))
        .ok_or_else(|| BillingError::InvalidPayload("missing data.object".to_string()))?;
    serde_json::from_value(object.clone())
        .map_err(|e| BillingError::InvalidPayload(format!("malformed data.object: {e}")))
}

/// Deserialize the `data` block of an Iyzico event envelope.
fn extract_iyzico_data<T: for<'de> Deserialize<'de>>(body: &JsonValue) -> BillingResult<T> {
    let data = body
        .get("data")
        .ok_or_else(|| BillingError::InvalidPayload("missing data field".to_string()))?;
    serde_json::from_value(data.clone())
        .map_err(|e| BillingError::InvalidPayload(format!("malformed event data: {e}")))
}

fn map_stripe_subscription_status(status: &str) -> SubscriptionStatus {
    match status {
        "trialing" => SubscriptionStatus::Trialing,
        "past_due" => SubscriptionStatus::PastDue,
        "canceled" => SubscriptionStatus::Cancelled,
        _ => SubscriptionStatus::Active,
    }
}

fn from_unix(ts: i64) -> Option<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp(ts).ok()
}

#[derive(Debug, Deserialize)]
struct StripeSubscription {
    id: String,
    status: Option<String>,
    #[serde(default)]
    metadata: HashMap<String, String>,
    current_period_start: Option<i64>,
    current_period_end: Option<i64>,
    plan: Option<StripePlan>,
}

#[derive(Debug, Deserialize)]
struct StripePlan {
    interval: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeInvoice {
    id: String,
    subscription: Option<String>,
    amount_due: Option<i64>,
    currency: Option<String>,
    period_start: Option<i64>,
    period_end: Option<i64>,
    due_date: Option<i64>,
    #[serde(default)]
    lines: StripeInvoiceLines,
}

impl StripeInvoice {
    fn line_items(&self) -> Vec<InvoiceLineItem> {
        self.lines
            .data
            .iter()
            .map(|line| {
                let quantity = line.quantity.unwrap_or(1).max(1);
                let amount = line.amount.unwrap_or(0);
                InvoiceLineItem {
                    description: line
                        .description
                        .clone()
                        .unwrap_or_else(|| "Invoice item".to_string()),
                    quantity: quantity as i32,
                    unit_amount_cents: amount / quantity,
                    amount_cents: amount,
                }
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct StripeInvoiceLines {
    #[serde(default)]
    data: Vec<StripeInvoiceLine>,
}

#[derive(Debug, Deserialize)]
struct StripeInvoiceLine {
    description: Option<String>,
    quantity: Option<i64>,
    amount: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IyzicoSubscriptionData {
    subscription_reference_code: String,
    start_date: Option<i64>,
    end_date: Option<i64>,
    invoice: Option<IyzicoInvoice>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct IyzicoInvoice {
    reference_code: String,
    /// Decimal major-unit price as Iyzico sends it (e.g. 299.90).
    price: Option<f64>,
    currency_code: Option<String>,
}

impl IyzicoInvoice {
    fn amount_cents(&self) -> i64 {
        (self.price.unwrap_or(0.0) * 100.0).round() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stripe_status_mapping() {
        assert_eq!(
            map_stripe_subscription_status("trialing"),
            SubscriptionStatus::Trialing
        );
        assert_eq!(
            map_stripe_subscription_status("canceled"),
            SubscriptionStatus::Cancelled
        );
        assert_eq!(
            map_stripe_subscription_status("active"),
            SubscriptionStatus::Active
        );
        assert_eq!(
            map_stripe_subscription_status("past_due"),
            SubscriptionStatus::PastDue
        );
    }

    #[test]
    fn iyzico_price_converts_to_cents() {
        let invoice = IyzicoInvoice {
            reference_code: "inv-1".to_string(),
            price: Some(299.90),
            currency_code: None,
        };
        assert_eq!(invoice.amount_cents(), 29990);
    }

    #[test]
    fn event_type_extraction_per_provider() {
        let stripe = serde_json::json!({"type": "invoice.created"});
        assert_eq!(
            extract_event_type(EventSource::Stripe, &stripe).unwrap(),
            "invoice.created"
        );

        let iyzico = serde_json::json!({"eventType": "SUBSCRIPTION_RENEWED"});
        assert_eq!(
            extract_event_type(EventSource::Iyzico, &iyzico).unwrap(),
            "SUBSCRIPTION_RENEWED"
        );

        let missing = serde_json::json!({"foo": 1});
        assert!(extract_event_type(EventSource::Stripe, &missing).is_err());
    }
}
