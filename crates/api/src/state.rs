//! Application state

use std::sync::Arc;

use propdesk_billing::BillingService;

use crate::config::Config;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub billing: Arc<BillingService>,
    pub config: Config,
}

impl AppState {
    pub fn new(billing: BillingService, config: Config) -> Self {
        Self {
            billing: Arc::new(billing),
            config,
        }
    }
}
