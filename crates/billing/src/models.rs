//! Billing domain records and status enums
//!
//! Three record types flow through the webhook core: the durable
//! `WebhookEvent` log row, the `Subscription` being reconciled, and the
//! `Invoice` documents attached to it. Status enums carry the legal
//! state machines; all transitions are checked here so the services
//! stay thin.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;
use uuid::Uuid;

/// Payment provider that originated a webhook call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    /// Primary provider; calls carry a `stripe-signature` header.
    Stripe,
    /// Secondary provider; no transport signature.
    Iyzico,
}

impl EventSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSource::Stripe => "stripe",
            EventSource::Iyzico => "iyzico",
        }
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stripe" => Ok(EventSource::Stripe),
            "iyzico" => Ok(EventSource::Iyzico),
            other => Err(format!("unknown event source: {other}")),
        }
    }
}

/// Processing status of a logged webhook event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Processed,
    Failed,
}

impl EventStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventStatus::Pending => "pending",
            EventStatus::Processing => "processing",
            EventStatus::Processed => "processed",
            EventStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for EventStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(EventStatus::Pending),
            "processing" => Ok(EventStatus::Processing),
            "processed" => Ok(EventStatus::Processed),
            "failed" => Ok(EventStatus::Failed),
            other => Err(format!("unknown event status: {other}")),
        }
    }
}

/// Durable record of one inbound webhook call. Exactly one row exists
/// per call; only the router mutates `status` and only the retry
/// utility resets it back to `pending`.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: Uuid,
    pub event_type: String,
    pub source: EventSource,
    pub payload: JsonValue,
    pub status: EventStatus,
    pub retry_count: i32,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339::option")]
    pub processed_at: Option<OffsetDateTime>,
}

/// Insert payload for a webhook event row.
#[derive(Debug, Clone)]
pub struct NewWebhookEvent {
    pub event_type: String,
    pub source: EventSource,
    pub payload: JsonValue,
    pub created_at: OffsetDateTime,
}

/// Subscription lifecycle status.
///
/// `cancelled` is terminal: nothing in this component reopens a
/// cancelled subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Trialing,
    Active,
    PastDue,
    Cancelled,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Trialing => "trialing",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::PastDue => "past_due",
            SubscriptionStatus::Cancelled => "cancelled",
        }
    }

    /// Whether the state machine permits moving to `next`.
    ///
    /// Allowed: trialing -> active, active -> past_due,
    /// active/past_due -> active (renewal), any -> cancelled.
    /// Re-asserting the current status is permitted (provider events
    /// are delivered at least once).
    pub fn can_transition_to(&self, next: SubscriptionStatus) -> bool {
        use SubscriptionStatus::*;
        if *self == Cancelled {
            return next == Cancelled;
        }
        match (self, next) {
            (_, Cancelled) => true,
            (Trialing, Active) => true,
            (Active, PastDue) => true,
            (PastDue, Active) => true,
            (a, b) if *a == b => true,
            _ => false,
        }
    }
}

impl fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SubscriptionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "trialing" => Ok(SubscriptionStatus::Trialing),
            "active" => Ok(SubscriptionStatus::Active),
            "past_due" => Ok(SubscriptionStatus::PastDue),
            "cancelled" => Ok(SubscriptionStatus::Cancelled),
            other => Err(format!("unknown subscription status: {other}")),
        }
    }
}

/// A billing relationship between a brokerage user and a plan.
#[derive(Debug, Clone, Serialize)]
pub struct Subscription {
    pub id: Uuid,
    /// Provider reference code; unique across the table.
    pub external_id: String,
    pub user_id: Uuid,
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
    /// "monthly" or "yearly".
    pub billing_cycle: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub current_period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub next_billing_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

/// Insert payload for a subscription row.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    pub external_id: String,
    pub user_id: Uuid,
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub billing_cycle: String,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
    pub next_billing_date: Option<OffsetDateTime>,
}

/// Partial update applied to a subscription. Last write wins; fields
/// left as `None` keep their current value.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionChange {
    pub status: Option<SubscriptionStatus>,
    pub next_billing_date: Option<OffsetDateTime>,
    pub plan_id: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
}

/// Invoice status. Both `paid` and `payment_failed` are terminal for
/// this component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvoiceStatus {
    Pending,
    Paid,
    PaymentFailed,
}

impl InvoiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            InvoiceStatus::Pending => "pending",
            InvoiceStatus::Paid => "paid",
            InvoiceStatus::PaymentFailed => "payment_failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, InvoiceStatus::Pending)
    }
}

impl fmt::Display for InvoiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InvoiceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(InvoiceStatus::Pending),
            "paid" => Ok(InvoiceStatus::Paid),
            "payment_failed" => Ok(InvoiceStatus::PaymentFailed),
            other => Err(format!("unknown invoice status: {other}")),
        }
    }
}

/// One line of an invoice, stored as JSON alongside the invoice row.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceLineItem {
    pub description: String,
    pub quantity: i32,
    pub unit_amount_cents: i64,
    pub amount_cents: i64,
}

/// A billable document tied to a subscription billing period.
#[derive(Debug, Clone, Serialize)]
pub struct Invoice {
    pub id: Uuid,
    pub subscription_id: Uuid,
    /// Provider invoice reference; unique per provider.
    pub external_id: String,
    pub source: EventSource,
    /// Generated as `INV-<year>-<NNN>`, sequential per year.
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub currency: String,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_start: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub period_end: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub due_date: Option<OffsetDateTime>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub paid_at: Option<OffsetDateTime>,
    pub line_items: Vec<InvoiceLineItem>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

/// Insert payload for an invoice row.
#[derive(Debug, Clone)]
pub struct NewInvoice {
    pub subscription_id: Uuid,
    pub external_id: String,
    pub source: EventSource,
    pub invoice_number: String,
    pub status: InvoiceStatus,
    pub amount_due_cents: i64,
    pub amount_paid_cents: i64,
    pub currency: String,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub due_date: Option<OffsetDateTime>,
    pub line_items: Vec<InvoiceLineItem>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_is_terminal() {
        use SubscriptionStatus::*;
        assert!(!Cancelled.can_transition_to(Active));
        assert!(!Cancelled.can_transition_to(Trialing));
        assert!(!Cancelled.can_transition_to(PastDue));
        assert!(Cancelled.can_transition_to(Cancelled));
    }

    #[test]
    fn renewal_reactivates_past_due() {
        use SubscriptionStatus::*;
        assert!(PastDue.can_transition_to(Active));
        assert!(Active.can_transition_to(Active));
    }

    #[test]
    fn trialing_activates_on_payment() {
        use SubscriptionStatus::*;
        assert!(Trialing.can_transition_to(Active));
        assert!(!Trialing.can_transition_to(PastDue));
    }

    #[test]
    fn any_status_can_cancel() {
        use SubscriptionStatus::*;
        for status in [Trialing, Active, PastDue] {
            assert!(status.can_transition_to(Cancelled), "{status} -> cancelled");
        }
    }

    #[test]
    fn status_strings_round_trip() {
        for status in ["pending", "processing", "processed", "failed"] {
            assert_eq!(status.parse::<EventStatus>().unwrap().as_str(), status);
        }
        for status in ["trialing", "active", "past_due", "cancelled"] {
            assert_eq!(
                status.parse::<SubscriptionStatus>().unwrap().as_str(),
                status
            );
        }
        for status in ["pending", "paid", "payment_failed"] {
            assert_eq!(status.parse::<InvoiceStatus>().unwrap().as_str(), status);
        }
    }

    #[test]
    fn invoice_terminal_statuses() {
        assert!(!InvoiceStatus::Pending.is_terminal());
        assert!(InvoiceStatus::Paid.is_terminal());
        assert!(InvoiceStatus::PaymentFailed.is_terminal());
    }
}
