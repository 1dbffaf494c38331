use std::sync::Arc;

use crate::error::DeliveryError;
use crate::messaging::ChatMessenger;
use crate::models::{Order, Product};

/// Sends purchased content to the buyer.
///
/// Delivery is decoupled from payment capture: a failure here is reported to the
/// caller but never touches the order, which stays `Paid`. Failed deliveries are
/// not queued for retry.
#[derive(Clone)]
pub struct DeliveryNotifier {
    messenger: Arc<dyn ChatMessenger>,
}

pub fn delivery_message(product: &Product) -> String {
    format!(
        "Payment approved!\n\nYour content '{}' is unlocked:\n{}",
        product.name, product.content
    )
}

impl DeliveryNotifier {
    pub fn new(messenger: Arc<dyn ChatMessenger>) -> Self {
        Self { messenger }
    }

    pub async fn deliver(&self, order: &Order, product: &Product) -> Result<(), DeliveryError> {
        match self
            .messenger
            .send_text(order.buyer_id, &delivery_message(product))
            .await
        {
            Ok(()) => {
                tracing::info!(
                    "Delivered product {} for order {} to buyer {}",
                    product.id,
                    order.id,
                    order.buyer_id
                );
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    "Failed to deliver product {} for order {} to buyer {}: {}",
                    product.id,
                    order.id,
                    order.buyer_id,
                    source
                );
                Err(DeliveryError::Messaging {
                    order_id: order.id.clone(),
                    source,
                })
            }
        }
    }
}
