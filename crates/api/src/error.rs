//! HTTP error mapping
//!
//! Client-caused billing errors (bad signature, bad payload) become
//! 400 with a machine-readable `error` code and a human `message`.
//! Everything else is a 500 with the detail kept out of the response
//! body and logged instead.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use propdesk_billing::BillingError;

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Billing(#[from] BillingError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self {
            ApiError::Billing(e) if e.is_client_error() => (
                StatusCode::BAD_REQUEST,
                ErrorBody {
                    error: error_code(e),
                    message: Some(e.to_string()),
                },
            ),
            ApiError::Billing(e) => {
                tracing::error!(error = %e, "Webhook request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal_error",
                        message: None,
                    },
                )
            }
            ApiError::Internal(e) => {
                tracing::error!(error = %e, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    ErrorBody {
                        error: "internal_error",
                        message: None,
                    },
                )
            }
        };
        (status, Json(body)).into_response()
    }
}

fn error_code(e: &BillingError) -> &'static str {
    match e {
        BillingError::MissingSignature => "missing_signature",
        BillingError::SignatureInvalid => "invalid_signature",
        BillingError::InvalidPayload(_) => "invalid_payload",
        BillingError::Database(_) | BillingError::Internal(_) => "internal_error",
    }
}
