//! Operational utilities over the event log
//!
//! Retry re-queues failed events by flipping them back to `pending`
//! with a cleared error and retry counter; re-delivery itself happens
//! out of band. Cleanup prunes rows older than a cutoff; there is no
//! soft delete.

use std::sync::Arc;

use time::{Duration, OffsetDateTime};

use crate::error::BillingResult;
use crate::store::Store;

/// Result of a retry sweep.
#[derive(Debug, Clone, Copy)]
pub struct RetryOutcome {
    pub retried_count: u64,
}

/// Result of a cleanup sweep.
#[derive(Debug, Clone, Copy)]
pub struct CleanupOutcome {
    pub deleted_count: u64,
}

#[derive(Clone)]
pub struct MaintenanceService {
    store: Arc<dyn Store>,
}

impl MaintenanceService {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Flip every `failed` event back to `pending`, clearing the
    /// stored error and resetting the retry counter to zero.
    pub async fn retry_failed(&self) -> BillingResult<RetryOutcome> {
        let retried_count = self.store.reset_failed_events().await?;
        tracing::info!(retried_count = retried_count, "Failed webhook events re-queued");
        Ok(RetryOutcome { retried_count })
    }

    /// Delete events created more than `days` days ago. Values below
    /// 1 are treated as 1 so the cutoff can never reach the future.
    pub async fn cleanup(&self, days: i64) -> BillingResult<CleanupOutcome> {
        let days = days.max(1);
        let cutoff = OffsetDateTime::now_utc() - Duration::days(days);
        let deleted_count = self.store.delete_events_before(cutoff).await?;
        tracing::info!(
            deleted_count = deleted_count,
            days = days,
            "Old processed webhook events deleted"
        );
        Ok(CleanupOutcome { deleted_count })
    }
}
