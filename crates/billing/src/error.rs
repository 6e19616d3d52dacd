//! Billing error taxonomy
//!
//! Transport-level rejections (`MissingSignature`, `SignatureInvalid`,
//! `InvalidPayload`) surface before anything is persisted and map to
//! HTTP 400. Store failures map to HTTP 500. "Subscription or invoice
//! not found" is deliberately NOT an error — handlers treat it as a
//! no-op and return `Option` instead.

use thiserror::Error;

pub type BillingResult<T> = Result<T, BillingError>;

#[derive(Debug, Error)]
pub enum BillingError {
    /// The primary provider's signature header was absent.
    #[error("missing stripe-signature header")]
    MissingSignature,

    /// Signature header present but malformed, stale, or mismatched.
    #[error("webhook signature verification failed")]
    SignatureInvalid,

    /// Request body was not the JSON shape the provider sends.
    #[error("invalid webhook payload: {0}")]
    InvalidPayload(String),

    /// The persistence layer rejected an operation.
    #[error("database error: {0}")]
    Database(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl BillingError {
    /// True for errors the caller caused (HTTP 400 class).
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            BillingError::MissingSignature
                | BillingError::SignatureInvalid
                | BillingError::InvalidPayload(_)
        )
    }
}

impl From<sqlx::Error> for BillingError {
    fn from(e: sqlx::Error) -> Self {
        BillingError::Database(e.to_string())
    }
}

impl From<serde_json::Error> for BillingError {
    fn from(e: serde_json::Error) -> Self {
        BillingError::InvalidPayload(e.to_string())
    }
}
