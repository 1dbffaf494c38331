pub mod mercadopago;

pub use mercadopago::handle_mercadopago_webhook;

use axum::{Router, http::StatusCode, routing::post};

use crate::db::AppState;

/// Webhook handlers answer with a bare status and a short reason.
pub type WebhookResult = (StatusCode, &'static str);

pub fn router() -> Router<AppState> {
    Router::new().route("/webhook/mercadopago", post(handle_mercadopago_webhook))
}
