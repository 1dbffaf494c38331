use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::models::{Buyer, Order, Product};

use super::{PaymentDescriptor, PaymentGateway, PaymentStatus};

pub const MERCADO_PAGO_API_URL: &str = "https://api.mercadopago.com";

#[derive(Debug, Clone)]
pub struct MercadoPagoConfig {
    pub access_token: String,
    /// API base URL, overridable for tests
    pub api_base: String,
    /// Where the gateway posts payment notifications
    pub notification_url: String,
    /// Domain for the synthetic payer email (the gateway requires one)
    pub payer_email_domain: String,
    pub timeout: Duration,
}

#[derive(Debug, Serialize)]
struct CreatePaymentRequest<'a> {
    transaction_amount: f64,
    description: &'a str,
    payment_method_id: &'static str,
    payer: PayerRequest<'a>,
    notification_url: &'a str,
    external_reference: &'a str,
}

#[derive(Debug, Serialize)]
struct PayerRequest<'a> {
    email: String,
    first_name: &'a str,
    last_name: String,
}

#[derive(Debug, Deserialize)]
struct PaymentResponse {
    /// Numeric in practice; accepted as any JSON scalar
    id: serde_json::Value,
    status: String,
    #[serde(default)]
    external_reference: Option<String>,
    #[serde(default)]
    point_of_interaction: Option<PointOfInteraction>,
}

#[derive(Debug, Deserialize)]
struct PointOfInteraction {
    #[serde(default)]
    transaction_data: Option<TransactionData>,
}

#[derive(Debug, Deserialize)]
struct TransactionData {
    #[serde(default)]
    qr_code: Option<String>,
    #[serde(default)]
    qr_code_base64: Option<String>,
}

impl PaymentResponse {
    fn into_descriptor(self) -> Result<PaymentDescriptor, GatewayError> {
        let id = match self.id {
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::String(s) if !s.is_empty() => s,
            _ => return Err(GatewayError::MissingField("payment id")),
        };

        let transaction_data = self
            .point_of_interaction
            .and_then(|poi| poi.transaction_data);
        let (qr_code, qr_code_base64) = match transaction_data {
            Some(data) => (data.qr_code, data.qr_code_base64),
            None => (None, None),
        };

        Ok(PaymentDescriptor {
            id,
            status: PaymentStatus::from_gateway(&self.status),
            external_reference: self.external_reference.filter(|r| !r.trim().is_empty()),
            qr_code,
            qr_code_base64,
        })
    }
}

/// Mercado Pago PIX payments client.
#[derive(Clone)]
pub struct MercadoPagoClient {
    client: Client,
    config: MercadoPagoConfig,
}

impl MercadoPagoClient {
    pub fn new(config: MercadoPagoConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn read_payment(response: Response) -> Result<PaymentDescriptor, GatewayError> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Api {
                status: status.as_u16(),
                body,
            });
        }

        let payment: PaymentResponse = response
            .json()
            .await
            .map_err(|e| GatewayError::Decode(e.to_string()))?;
        payment.into_descriptor()
    }
}

#[async_trait]
impl PaymentGateway for MercadoPagoClient {
    fn name(&self) -> &'static str {
        "mercadopago"
    }

    async fn create_payment(
        &self,
        order: &Order,
        product: &Product,
        buyer: &Buyer,
    ) -> Result<PaymentDescriptor, GatewayError> {
        let request = CreatePaymentRequest {
            transaction_amount: product.price_amount(),
            description: &product.name,
            payment_method_id: "pix",
            payer: PayerRequest {
                email: buyer.payer_email(&self.config.payer_email_domain),
                first_name: "Telegram",
                last_name: buyer.id.to_string(),
            },
            notification_url: &self.config.notification_url,
            external_reference: &order.id,
        };

        // The API requires an idempotency key on creation. A fresh key per call
        // deduplicates transport retries only, not repeated buyer actions.
        let response = self
            .client
            .post(self.url("/v1/payments"))
            .bearer_auth(&self.config.access_token)
            .header("X-Idempotency-Key", uuid::Uuid::new_v4().to_string())
            .json(&request)
            .send()
            .await?;

        let payment = Self::read_payment(response).await?;

        if payment.status != PaymentStatus::Pending {
            return Err(GatewayError::UnexpectedStatus(
                payment.status.as_str().to_string(),
            ));
        }

        tracing::debug!(
            "Created {} payment {} for order {}",
            self.name(),
            payment.id,
            order.id
        );

        Ok(payment)
    }

    async fn fetch_status(
        &self,
        gateway_payment_id: &str,
    ) -> Result<PaymentDescriptor, GatewayError> {
        // The id is interpolated into the URL path
        let well_formed = !gateway_payment_id.is_empty()
            && gateway_payment_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !well_formed {
            return Err(GatewayError::InvalidPaymentId(gateway_payment_id.to_string()));
        }

        let response = self
            .client
            .get(self.url(&format!("/v1/payments/{}", gateway_payment_id)))
            .bearer_auth(&self.config.access_token)
            .send()
            .await?;

        Self::read_payment(response).await
    }
}
