//! Payment reconciliation: the state machine behind the webhook.
//!
//! A notification only says "something happened to payment X". The engine asks the
//! gateway what actually happened, maps the payment back to an order through its
//! external reference, and moves the order to `Paid` with a single compare-and-set.
//! Only the caller that wins that transition delivers content, which makes replays
//! and concurrent duplicates harmless.
//!
//! Everything short of a storage failure ends in an acknowledgment. The gateway
//! redelivers on non-2xx responses, and a retry only helps when our own storage
//! failed, not when the event was simply inapplicable.

use std::sync::Arc;

use serde::Deserialize;

use crate::db::Store;
use crate::delivery::DeliveryNotifier;
use crate::error::StoreResult;
use crate::id::parse_order_id;
use crate::models::{OrderStatus, TransitionResult};
use crate::payments::{PaymentGateway, PaymentStatus};
use crate::signature::VerifiedPayload;

/// Notification body sent by the gateway.
#[derive(Debug, Deserialize)]
pub struct NotificationEnvelope {
    #[serde(rename = "type", default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub data: Option<NotificationData>,
}

#[derive(Debug, Deserialize)]
pub struct NotificationData {
    #[serde(default)]
    pub id: Option<serde_json::Value>,
}

impl NotificationEnvelope {
    pub fn is_payment(&self) -> bool {
        self.event_type.as_deref() == Some("payment")
    }

    /// `data.id`, accepted as a non-empty string or a number.
    pub fn payment_id(&self) -> Option<String> {
        match self.data.as_ref()?.id.as_ref()? {
            serde_json::Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            serde_json::Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Which branch a reconciliation attempt ended in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    UnreadablePayload,
    IgnoredEventType,
    MissingPaymentId,
    /// The body names a different payment than the signed query string.
    PaymentIdMismatch,
    GatewayUnavailable,
    NotApproved(PaymentStatus),
    UnresolvableReference,
    OrderNotFound,
    /// The order had already left `Pending`: a replay or a lost race.
    AlreadyProcessed(OrderStatus),
    Delivered,
    /// Order is `Paid`; the buyer could not be reached.
    DeliveryFailed,
    /// Order is `Paid` but its product is gone. Needs manual intervention.
    ProductMissing,
}

impl ReconcileOutcome {
    pub fn message(&self) -> &'static str {
        match self {
            Self::UnreadablePayload => "Unreadable payload",
            Self::IgnoredEventType => "Event ignored",
            Self::MissingPaymentId => "No payment ID",
            Self::PaymentIdMismatch => "Payment ID mismatch",
            Self::GatewayUnavailable => "Payment status unavailable",
            Self::NotApproved(_) => "Payment not approved",
            Self::UnresolvableReference => "No order reference",
            Self::OrderNotFound => "Order not found",
            Self::AlreadyProcessed(_) => "Already processed",
            Self::Delivered => "OK",
            Self::DeliveryFailed => "Paid, delivery failed",
            Self::ProductMissing => "Paid, product missing",
        }
    }
}

pub struct ReconciliationEngine {
    gateway: Arc<dyn PaymentGateway>,
    store: Store,
    notifier: DeliveryNotifier,
}

impl ReconciliationEngine {
    pub fn new(gateway: Arc<dyn PaymentGateway>, store: Store, notifier: DeliveryNotifier) -> Self {
        Self {
            gateway,
            store,
            notifier,
        }
    }

    /// Reconcile an authenticated notification. Only storage failures are errors.
    pub async fn reconcile(&self, payload: &VerifiedPayload) -> StoreResult<ReconcileOutcome> {
        let envelope: NotificationEnvelope = match serde_json::from_slice(&payload.body) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(
                    "Unreadable notification body for payment {}: {}",
                    payload.payment_id,
                    e
                );
                return Ok(ReconcileOutcome::UnreadablePayload);
            }
        };

        self.reconcile_envelope(&envelope, &payload.payment_id).await
    }

    async fn reconcile_envelope(
        &self,
        envelope: &NotificationEnvelope,
        signed_payment_id: &str,
    ) -> StoreResult<ReconcileOutcome> {
        if !envelope.is_payment() {
            tracing::debug!("Ignoring notification of type {:?}", envelope.event_type);
            return Ok(ReconcileOutcome::IgnoredEventType);
        }

        let Some(payment_id) = envelope.payment_id() else {
            tracing::debug!("Payment notification without data.id");
            return Ok(ReconcileOutcome::MissingPaymentId);
        };

        // The body is not covered by the signature; only the signed id is looked up
        if payment_id != signed_payment_id {
            tracing::warn!(
                security_event = true,
                "Notification body names payment {} but payment {} was signed, ignoring",
                payment_id,
                signed_payment_id
            );
            return Ok(ReconcileOutcome::PaymentIdMismatch);
        }

        // Ground truth comes from the gateway, never from the notification body
        let payment = match self.gateway.fetch_status(&payment_id).await {
            Ok(payment) => payment,
            Err(e) => {
                if e.is_timeout() {
                    tracing::warn!(
                        "Timed out fetching {} payment {}, awaiting redelivery",
                        self.gateway.name(),
                        payment_id
                    );
                } else {
                    tracing::warn!(
                        "Failed to fetch {} payment {}: {}",
                        self.gateway.name(),
                        payment_id,
                        e
                    );
                }
                return Ok(ReconcileOutcome::GatewayUnavailable);
            }
        };

        if payment.status != PaymentStatus::Approved {
            tracing::info!(
                "Payment {} is {}, no action taken",
                payment_id,
                payment.status.as_str()
            );
            return Ok(ReconcileOutcome::NotApproved(payment.status));
        }

        let Some(order_id) = payment.external_reference.as_deref().and_then(parse_order_id) else {
            tracing::warn!(
                "Approved payment {} has no usable external reference ({:?})",
                payment_id,
                payment.external_reference
            );
            return Ok(ReconcileOutcome::UnresolvableReference);
        };

        let Some(order) = self.store.find_order(order_id).await? else {
            tracing::warn!(
                "Approved payment {} references unknown order {}",
                payment_id,
                order_id
            );
            return Ok(ReconcileOutcome::OrderNotFound);
        };

        if let Some(linked) = &order.gateway_payment_id {
            if linked != &payment.id {
                tracing::warn!(
                    "Order {} is linked to payment {} but payment {} was approved for it",
                    order.id,
                    linked,
                    payment.id
                );
            }
        }

        match self
            .store
            .transition_if_pending(&order.id, OrderStatus::Paid)
            .await?
        {
            TransitionResult::Transitioned => {
                tracing::info!("Order {} marked paid (payment {})", order.id, payment.id);
            }
            TransitionResult::AlreadyTerminal(status) => {
                tracing::info!(
                    "Order {} already {}, skipping delivery",
                    order.id,
                    status.as_ref()
                );
                return Ok(ReconcileOutcome::AlreadyProcessed(status));
            }
            TransitionResult::NotFound => {
                tracing::warn!("Order {} vanished before transition", order.id);
                return Ok(ReconcileOutcome::OrderNotFound);
            }
        }

        // From here on the payment is captured; nothing below reverts the order.
        let Some(product) = self.store.find_product(&order.product_id).await? else {
            tracing::error!(
                "Order {} is paid but product {} does not exist, manual delivery required",
                order.id,
                order.product_id
            );
            return Ok(ReconcileOutcome::ProductMissing);
        };

        match self.notifier.deliver(&order, &product).await {
            Ok(()) => Ok(ReconcileOutcome::Delivered),
            Err(_) => Ok(ReconcileOutcome::DeliveryFailed),
        }
    }
}
