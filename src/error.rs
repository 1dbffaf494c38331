use std::time::Duration;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

use crate::models::OrderStatus;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal error: {0}")]
    Internal(String),
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "Bad request", Some(msg.clone())),
            AppError::Store(e) => {
                tracing::error!("Storage error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

/// Startup configuration problems. Never produced per request.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// Reasons a webhook request fails authentication.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SignatureError {
    #[error("Missing {0} header")]
    MissingHeader(&'static str),

    #[error("Malformed signature header: {0}")]
    MalformedHeader(&'static str),

    #[error("Payment ID not found in query parameters")]
    MissingPaymentId,

    #[error("Signature does not match")]
    HashMismatch,

    #[error("Webhook secret cannot be used as an HMAC key")]
    InvalidSecret,
}

/// Failures talking to the payment gateway. Callers decide whether to retry.
#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Gateway returned HTTP {status}: {body}")]
    Api { status: u16, body: String },

    #[error("Failed to decode gateway response: {0}")]
    Decode(String),

    #[error("Gateway reported unexpected payment status '{0}'")]
    UnexpectedStatus(String),

    #[error("Gateway response is missing {0}")]
    MissingField(&'static str),

    #[error("Invalid gateway payment id '{0}'")]
    InvalidPaymentId(String),
}

impl GatewayError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Http(e) if e.is_timeout())
    }
}

/// Persistence failures. The only error kind that reaches the webhook response.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Gateway payment ID {0} is already linked to another order")]
    DuplicateGatewayPaymentId(String),

    #[error("Invalid order status transition {from:?} -> {to:?}")]
    InvalidTransition { from: OrderStatus, to: OrderStatus },

    #[error("Storage operation '{op}' timed out after {after:?}")]
    Timeout { op: &'static str, after: Duration },

    #[error("Storage task failed: {0}")]
    Task(String),
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum MessagingError {
    /// Transport failure. Built with the request URL stripped, since it carries the bot token.
    #[error("Messaging request failed: {0}")]
    Http(reqwest::Error),

    #[error("Messaging API rejected the request: {0}")]
    Rejected(String),
}

#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error("Failed to deliver content for order {order_id}: {source}")]
    Messaging {
        order_id: String,
        #[source]
        source: MessagingError,
    },
}
