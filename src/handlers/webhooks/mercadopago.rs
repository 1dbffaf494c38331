use std::collections::HashMap;

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
};

use crate::db::AppState;
use crate::error::{AppError, Result, SignatureError};
use crate::signature::{self, SIGNATURE_HEADER};

use super::WebhookResult;

/// Mercado Pago payment notifications.
///
/// Anything the gateway should not redeliver is acknowledged with 200, including
/// requests that fail authentication. Only a malformed signature header (400), a
/// missing secret (500) and storage failures (500) are reported as errors.
pub async fn handle_mercadopago_webhook(
    State(state): State<AppState>,
    Query(query): Query<HashMap<String, String>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<WebhookResult> {
    if state.webhook_secret.is_empty() {
        tracing::error!("Webhook secret is not configured, rejecting notification");
        return Ok((StatusCode::INTERNAL_SERVER_ERROR, "Webhook secret not configured"));
    }

    let payload = match signature::verify(&headers, &query, &body, &state.webhook_secret) {
        Ok(payload) => payload,
        Err(SignatureError::MalformedHeader(reason)) => {
            tracing::warn!("Malformed {} header: {}", SIGNATURE_HEADER, reason);
            return Ok((StatusCode::BAD_REQUEST, "Malformed signature header"));
        }
        Err(SignatureError::HashMismatch) => {
            tracing::warn!(
                security_event = true,
                request_id = headers
                    .get(signature::REQUEST_ID_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or(""),
                "Webhook signature mismatch"
            );
            return Ok((StatusCode::OK, "Invalid signature"));
        }
        Err(SignatureError::InvalidSecret) => {
            return Err(AppError::Internal("Webhook secret rejected as HMAC key".into()));
        }
        Err(e @ SignatureError::MissingHeader(_)) => {
            tracing::debug!("Unauthenticated webhook: {}", e);
            return Ok((StatusCode::OK, "Missing signature headers"));
        }
        Err(SignatureError::MissingPaymentId) => {
            tracing::debug!("Webhook without payment id in query");
            return Ok((StatusCode::OK, "No payment ID"));
        }
    };

    let outcome = state.engine.reconcile(&payload).await?;
    tracing::debug!("Webhook for payment {} -> {:?}", payload.payment_id, outcome);

    Ok((StatusCode::OK, outcome.message()))
}
