//! Subscription state updater
//!
//! Mutates subscription rows from webhook events. Lookups are by the
//! provider reference (`external_id`); a missing subscription is a
//! no-op for every caller because some events (one-off invoices,
//! out-of-order deliveries) legitimately precede subscription
//! creation. Updates are last-write-wins; the only guard is the
//! status state machine, which keeps `cancelled` terminal.

use std::sync::Arc;

use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::BillingResult;
use crate::models::{NewSubscription, Subscription, SubscriptionChange, SubscriptionStatus};
use crate::store::Store;

/// Neutral subscription fields extracted from a provider event.
#[derive(Debug, Clone)]
pub struct SubscriptionEventData {
    pub external_id: String,
    pub user_id: Uuid,
    pub plan_id: Option<String>,
    pub status: SubscriptionStatus,
    pub billing_cycle: String,
    pub period_start: Option<OffsetDateTime>,
    pub period_end: Option<OffsetDateTime>,
    pub next_billing_date: Option<OffsetDateTime>,
}

/// Optional extras applied together with a status change.
#[derive(Debug, Clone, Default)]
pub struct StatusExtra {
    pub next_billing_date: Option<OffsetDateTime>,
    pub plan_id: Option<String>,
    pub current_period_start: Option<OffsetDateTime>,
    pub current_period_end: Option<OffsetDateTime>,
}

#[derive(Clone)]
pub struct SubscriptionService {
    store: Arc<dyn Store>,
}

impl SubscriptionService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Single lookup by provider reference; `None` when absent.
    pub async fn find_by_external_id(
        &self,
        external_id: &str,
    ) -> BillingResult<Option<Subscription>> {
        self.store
            .find_subscription_by_external_id(external_id)
            .await
    }

    /// Create a subscription from a subscription-created event. This
    /// is the only creation path in the component. If the reference
    /// already exists the event is treated as a sync: status and
    /// period fields are re-applied to the existing row.
    pub async fn create_from_event(
        &self,
        data: SubscriptionEventData,
    ) -> BillingResult<Subscription> {
        if let Some(existing) = self.find_by_external_id(&data.external_id).await? {
            tracing::info!(
                subscription_id = %existing.id,
                external_id = %data.external_id,
                "Subscription already exists, syncing from event"
            );
            let synced = self
                .update_status(
                    existing.id,
                    data.status,
                    StatusExtra {
                        next_billing_date: data.next_billing_date,
                        plan_id: data.plan_id,
                        current_period_start: data.period_start,
                        current_period_end: data.period_end,
                    },
                )
                .await?;
            return Ok(synced.unwrap_or(existing));
        }

        let created = self
            .store
            .insert_subscription(NewSubscription {
                external_id: data.external_id,
                user_id: data.user_id,
                plan_id: data.plan_id,
                status: data.status,
                billing_cycle: data.billing_cycle,
                current_period_start: data.period_start,
                current_period_end: data.period_end,
                next_billing_date: data.next_billing_date,
            })
            .await?;

        tracing::info!(
            subscription_id = %created.id,
            external_id = %created.external_id,
            status = %created.status,
            "Subscription created"
        );
        Ok(created)
    }

    /// Set the subscription status, optionally carrying billing
    /// extras. Last write wins; no optimistic concurrency control.
    ///
    /// Invalid transitions (anything out of `cancelled`, or jumps the
    /// state machine does not allow) are logged and leave the row
    /// unchanged.
    pub async fn update_status(
        &self,
        subscription_id: Uuid,
        new_status: SubscriptionStatus,
        extra: StatusExtra,
    ) -> BillingResult<Option<Subscription>> {
        let Some(current) = self.store.find_subscription_by_id(subscription_id).await? else {
            return Ok(None);
        };

        if !current.status.can_transition_to(new_status) {
            tracing::warn!(
                subscription_id = %subscription_id,
                current_status = %current.status,
                requested_status = %new_status,
                "Ignoring disallowed subscription status transition"
            );
            return Ok(Some(current));
        }

        self.store
            .update_subscription(
                subscription_id,
                SubscriptionChange {
                    status: Some(new_status),
                    next_billing_date: extra.next_billing_date,
                    plan_id: extra.plan_id,
                    current_period_start: extra.current_period_start,
                    current_period_end: extra.current_period_end,
                },
            )
            .await
    }

    /// Status change addressed by provider reference. Missing
    /// subscription is a no-op, not an error.
    pub async fn apply_event_status(
        &self,
        external_id: &str,
        new_status: SubscriptionStatus,
        extra: StatusExtra,
    ) -> BillingResult<Option<Subscription>> {
        let Some(subscription) = self.find_by_external_id(external_id).await? else {
            tracing::warn!(
                external_id = %external_id,
                requested_status = %new_status,
                "Subscription not found for event, skipping"
            );
            return Ok(None);
        };
        self.update_status(subscription.id, new_status, extra).await
    }

    /// Cancel by provider reference. Terminal: once cancelled the
    /// subscription never reopens inside this component.
    pub async fn cancel(&self, external_id: &str) -> BillingResult<Option<Subscription>> {
        let cancelled = self
            .apply_event_status(
                external_id,
                SubscriptionStatus::Cancelled,
                StatusExtra::default(),
            )
            .await?;
        if let Some(sub) = &cancelled {
            tracing::info!(
                subscription_id = %sub.id,
                external_id = %sub.external_id,
                "Subscription cancelled"
            );
        }
        Ok(cancelled)
    }
}
