use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};

use crate::db::Store;
use crate::error::StoreResult;
use crate::messaging::ChatMessenger;
use crate::models::CreateOrder;
use crate::payments::PaymentGateway;

pub const PRODUCT_NOT_FOUND_TEXT: &str = "Product not found.";
pub const BUYER_NOT_REGISTERED_TEXT: &str = "Please send /start before buying.";
pub const PAYMENT_UNAVAILABLE_TEXT: &str =
    "Sorry, we could not generate the payment. Please try again later.";
pub const QR_CAPTION: &str = "PIX payment generated! Scan the QR code or use the code below.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckoutOutcome {
    PaymentCreated {
        order_id: String,
        gateway_payment_id: String,
    },
    ProductNotFound,
    BuyerNotFound,
    /// The order exists but the gateway did not produce a payment for it. It stays
    /// `Pending` until the expiry sweep closes it.
    PaymentUnavailable { order_id: String },
}

/// Buyer-facing purchase flow: order, gateway payment, then PIX instructions.
pub struct CheckoutService {
    gateway: Arc<dyn PaymentGateway>,
    store: Store,
    messenger: Arc<dyn ChatMessenger>,
}

impl CheckoutService {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        store: Store,
        messenger: Arc<dyn ChatMessenger>,
    ) -> Self {
        Self {
            gateway,
            store,
            messenger,
        }
    }

    pub async fn start_checkout(
        &self,
        buyer_id: i64,
        product_id: &str,
    ) -> StoreResult<CheckoutOutcome> {
        let Some(product) = self.store.find_product(product_id).await? else {
            self.notify(buyer_id, PRODUCT_NOT_FOUND_TEXT).await;
            return Ok(CheckoutOutcome::ProductNotFound);
        };

        let Some(buyer) = self.store.find_buyer(buyer_id).await? else {
            self.notify(buyer_id, BUYER_NOT_REGISTERED_TEXT).await;
            return Ok(CheckoutOutcome::BuyerNotFound);
        };

        let order = self
            .store
            .create_order(CreateOrder {
                buyer_id,
                product_id: product.id.clone(),
                gateway_payment_id: None,
            })
            .await?;

        tracing::info!(
            "Created order {} for buyer {} (product {})",
            order.id,
            buyer_id,
            product.id
        );

        let payment = match self.gateway.create_payment(&order, &product, &buyer).await {
            Ok(payment) => payment,
            Err(e) => {
                tracing::warn!(
                    "Failed to create {} payment for order {}: {}",
                    self.gateway.name(),
                    order.id,
                    e
                );
                self.notify(buyer_id, PAYMENT_UNAVAILABLE_TEXT).await;
                return Ok(CheckoutOutcome::PaymentUnavailable { order_id: order.id });
            }
        };

        if !self
            .store
            .attach_gateway_payment_id(&order.id, &payment.id)
            .await?
        {
            // Fresh order, so this only happens if something else linked it first
            tracing::warn!(
                "Order {} already had a gateway payment, {} not linked",
                order.id,
                payment.id
            );
        }

        match payment.qr_code_base64.as_deref().map(|qr| BASE64.decode(qr.trim())) {
            Some(Ok(image)) => {
                if let Err(e) = self.messenger.send_image(buyer_id, image, QR_CAPTION).await {
                    tracing::warn!("Failed to send QR code for order {}: {}", order.id, e);
                }
            }
            Some(Err(e)) => {
                tracing::warn!("Undecodable QR image for payment {}: {}", payment.id, e);
            }
            None => {
                tracing::warn!("Payment {} came without a QR image", payment.id);
            }
        }

        match payment.qr_code.as_deref() {
            Some(code) => self.notify(buyer_id, code).await,
            None => tracing::warn!("Payment {} came without a PIX code", payment.id),
        }

        Ok(CheckoutOutcome::PaymentCreated {
            order_id: order.id,
            gateway_payment_id: payment.id,
        })
    }

    async fn notify(&self, buyer_id: i64, text: &str) {
        if let Err(e) = self.messenger.send_text(buyer_id, text).await {
            tracing::warn!("Failed to message buyer {}: {}", buyer_id, e);
        }
    }
}
