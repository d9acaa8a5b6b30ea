//! Payment gateway client.
//!
//! The gateway opens a hosted payment order for an amount and later hands the
//! client a `(order id, payment id, signature)` triple. Everything the gateway
//! returns is untrusted until validated here.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::PaymentConfig;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("order rejected with status {status}: {body}")]
    Rejected { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Request to open a hosted payment order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GatewayOrderRequest {
    /// Amount in hundredths of the currency unit.
    #[serde(rename = "amount")]
    pub amount_minor: i64,
    pub currency: String,
    pub receipt: String,
}

/// Hosted payment order as created by the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewayOrder {
    pub id: String,
    #[serde(rename = "amount")]
    pub amount_minor: i64,
    pub currency: String,
    #[serde(default)]
    pub receipt: Option<String>,
}

impl GatewayOrder {
    /// Check that the gateway created the order that was asked for.
    pub fn validate(self, request: &GatewayOrderRequest) -> Result<Self, GatewayError> {
        if self.id.trim().is_empty() {
            return Err(GatewayError::InvalidResponse("empty order id".to_string()));
        }
        if self.amount_minor != request.amount_minor {
            return Err(GatewayError::InvalidResponse(format!(
                "amount {} does not match requested {}",
                self.amount_minor, request.amount_minor
            )));
        }
        if !self.currency.eq_ignore_ascii_case(&request.currency) {
            return Err(GatewayError::InvalidResponse(format!(
                "currency {} does not match requested {}",
                self.currency, request.currency
            )));
        }
        Ok(self)
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, GatewayError>;
}

/// Razorpay orders API.
pub struct RazorpayGateway {
    client: reqwest::Client,
    api_base: String,
    key_id: String,
    key_secret: SecretString,
}

impl RazorpayGateway {
    pub fn new(config: &PaymentConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            key_id: config.key_id.clone(),
            key_secret: config.key_secret.clone(),
        }
    }
}

impl std::fmt::Debug for RazorpayGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RazorpayGateway")
            .field("api_base", &self.api_base)
            .field("key_id", &self.key_id)
            .field("key_secret", &"[REDACTED]")
            .finish()
    }
}

#[async_trait]
impl PaymentGateway for RazorpayGateway {
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/orders", self.api_base))
            .basic_auth(&self.key_id, Some(self.key_secret.expose_secret()))
            .json(request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(GatewayError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<GatewayOrder>().await?)
    }
}

/// Gateway that opens orders locally, for tests and offline replays.
#[derive(Debug, Clone, Copy, Default)]
pub struct OfflineGateway;

#[async_trait]
impl PaymentGateway for OfflineGateway {
    async fn create_order(
        &self,
        request: &GatewayOrderRequest,
    ) -> Result<GatewayOrder, GatewayError> {
        Ok(GatewayOrder {
            id: format!("order_{}", Uuid::new_v4().simple()),
            amount_minor: request.amount_minor,
            currency: request.currency.clone(),
            receipt: Some(request.receipt.clone()),
        })
    }
}
