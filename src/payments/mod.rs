mod mercadopago;

pub use mercadopago::*;

use async_trait::async_trait;

use crate::error::GatewayError;
use crate::models::{Buyer, Order, Product};

/// Payment status as reported by the gateway.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentStatus {
    Pending,
    Approved,
    Authorized,
    InProcess,
    InMediation,
    Rejected,
    Cancelled,
    Refunded,
    ChargedBack,
    Unknown(String),
}

impl PaymentStatus {
    pub fn from_gateway(s: &str) -> Self {
        match s {
            "pending" => Self::Pending,
            "approved" => Self::Approved,
            "authorized" => Self::Authorized,
            "in_process" => Self::InProcess,
            "in_mediation" => Self::InMediation,
            "rejected" => Self::Rejected,
            "cancelled" => Self::Cancelled,
            "refunded" => Self::Refunded,
            "charged_back" => Self::ChargedBack,
            other => Self::Unknown(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Authorized => "authorized",
            Self::InProcess => "in_process",
            Self::InMediation => "in_mediation",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
            Self::Refunded => "refunded",
            Self::ChargedBack => "charged_back",
            Self::Unknown(s) => s,
        }
    }
}

/// Gateway view of a payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PaymentDescriptor {
    pub id: String,
    pub status: PaymentStatus,
    /// Our order id, as sent at creation time
    pub external_reference: Option<String>,
    /// PIX copy-and-paste code
    pub qr_code: Option<String>,
    /// PNG QR code image, base64 encoded
    pub qr_code_base64: Option<String>,
}

/// The payment gateway, as seen by checkout and reconciliation.
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Gateway name for logging (e.g., "mercadopago")
    fn name(&self) -> &'static str;

    /// Create a payment for `order`. Succeeds only when the gateway reports the
    /// payment as pending.
    async fn create_payment(
        &self,
        order: &Order,
        product: &Product,
        buyer: &Buyer,
    ) -> Result<PaymentDescriptor, GatewayError>;

    /// Fetch the authoritative state of a payment.
    async fn fetch_status(&self, gateway_payment_id: &str)
    -> Result<PaymentDescriptor, GatewayError>;
}
