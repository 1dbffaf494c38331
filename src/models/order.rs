use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Expired,
    Failed,
}

impl OrderStatus {
    /// Transition table. Only `Pending` may move, and only to a terminal state.
    pub fn can_transition_to(self, next: OrderStatus) -> bool {
        match (self, next) {
            (OrderStatus::Pending, OrderStatus::Paid)
            | (OrderStatus::Pending, OrderStatus::Expired)
            | (OrderStatus::Pending, OrderStatus::Failed) => true,
            (OrderStatus::Pending, OrderStatus::Pending) => false,
            (OrderStatus::Paid, _) | (OrderStatus::Expired, _) | (OrderStatus::Failed, _) => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }
}

/// One purchase attempt. Never deleted: it is the audit record of the transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub buyer_id: i64,
    pub product_id: String,
    pub status: OrderStatus,
    /// Gateway payment linked at checkout. Write-once, unique across orders.
    pub gateway_payment_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrder {
    pub buyer_id: i64,
    pub product_id: String,
    /// Usually linked later with `attach_gateway_payment_id`, once the gateway answers.
    #[serde(default)]
    pub gateway_payment_id: Option<String>,
}

/// Result of a compare-and-set status transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionResult {
    /// The order was `Pending` and now holds the requested status.
    Transitioned,
    /// The order had already left `Pending`; nothing was written.
    AlreadyTerminal(OrderStatus),
    NotFound,
}
