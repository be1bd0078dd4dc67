//! Midtrans payment gateway client.
//!
//! Uses the Snap API for hosted checkout and the Core API (`/v2`) for
//! status queries and cancellation. Notifications are authenticated with
//! `sha512(order_id + status_code + gross_amount + server_key)`.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use secrecy::{ExposeSecret, Secret};
use serde::{Deserialize, Deserializer, Serialize};
use service_core::utils::digest::{hex_digest_eq, sha512_hex};
use tracing::{info, instrument, warn};

use crate::config::MidtransConfig;
use crate::error::GatewayError;
use crate::services::metrics::GATEWAY_REQUEST_DURATION;

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Open a hosted checkout for an order.
    async fn create_transaction(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError>;

    /// Cancel an order that has not been paid.
    async fn cancel(&self, order_id: &str) -> Result<GatewayTransaction, GatewayError>;

    /// Current state of an order at the gateway.
    async fn status(&self, order_id: &str) -> Result<GatewayTransaction, GatewayError>;

    /// Check a notification's `signature_key`.
    fn verify_signature(&self, notification: &WebhookNotification) -> bool;
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CustomerDetails {
    pub first_name: String,
    pub email: String,
    pub phone: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ItemDetail {
    pub id: String,
    pub price: i64,
    pub quantity: u32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutRequest {
    pub order_id: String,
    /// Whole rupiah.
    pub gross_amount: i64,
    pub expiry_hours: u32,
    pub customer: CustomerDetails,
    pub items: Vec<ItemDetail>,
}

#[derive(Debug, Serialize)]
struct SnapTransactionBody<'a> {
    transaction_details: TransactionDetails<'a>,
    customer_details: &'a CustomerDetails,
    item_details: &'a [ItemDetail],
    expiry: SnapExpiry,
}

#[derive(Debug, Serialize)]
struct TransactionDetails<'a> {
    order_id: &'a str,
    gross_amount: i64,
}

#[derive(Debug, Serialize)]
struct SnapExpiry {
    unit: &'static str,
    duration: u32,
}

/// Snap checkout handle.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct CheckoutSession {
    pub token: String,
    pub redirect_url: String,
}

/// Transaction state returned by the Core API status and cancel endpoints.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct GatewayTransaction {
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    pub status_code: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
    #[serde(default)]
    pub transaction_status: Option<String>,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default, deserialize_with = "string_or_number_opt")]
    pub gross_amount: Option<String>,
}

/// HTTP notification posted by Midtrans.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct WebhookNotification {
    pub order_id: String,
    pub transaction_status: String,
    #[serde(deserialize_with = "string_or_number")]
    pub status_code: String,
    #[serde(deserialize_with = "string_or_number")]
    pub gross_amount: String,
    pub signature_key: String,
    #[serde(default)]
    pub fraud_status: Option<String>,
    #[serde(default)]
    pub payment_type: Option<String>,
    #[serde(default)]
    pub transaction_id: Option<String>,
    #[serde(default)]
    pub transaction_time: Option<String>,
    #[serde(default)]
    pub settlement_time: Option<String>,
    #[serde(default)]
    pub status_message: Option<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    String(String),
    Number(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(value: StringOrNumber) -> Self {
        match value {
            StringOrNumber::String(s) => s,
            StringOrNumber::Number(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(deserializer).map(String::from)
}

fn string_or_number_opt<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(deserializer)?.map(String::from))
}

/// Signature Midtrans attaches to notifications for an order.
pub fn notification_signature(
    order_id: &str,
    status_code: &str,
    gross_amount: &str,
    server_key: &str,
) -> String {
    sha512_hex(&[order_id, status_code, gross_amount, server_key])
}

/// Verify `signature_key` against the payload fields, ignoring hex case.
pub fn verify_signature(notification: &WebhookNotification, server_key: &str) -> bool {
    let expected = notification_signature(
        &notification.order_id,
        &notification.status_code,
        &notification.gross_amount,
        server_key,
    );
    hex_digest_eq(&expected, &notification.signature_key)
}

#[derive(Clone)]
pub struct MidtransClient {
    client: Client,
    server_key: Secret<String>,
    snap_base_url: String,
    api_base_url: String,
}

impl MidtransClient {
    pub fn new(config: &MidtransConfig) -> Result<Self, GatewayError> {
        let client = Client::builder().timeout(config.timeout()).build()?;
        Ok(Self {
            client,
            server_key: config.server_key.clone(),
            snap_base_url: config.snap_base_url.trim_end_matches('/').to_string(),
            api_base_url: config.api_base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Check if the client has a server key.
    pub fn is_configured(&self) -> bool {
        !self.server_key.expose_secret().is_empty()
    }

    async fn error_from(response: Response) -> GatewayError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        match status {
            StatusCode::NOT_FOUND => GatewayError::OrderNotFound,
            StatusCode::PRECONDITION_FAILED => GatewayError::InvalidState,
            _ => GatewayError::Api {
                status: status.as_u16(),
                message: body,
            },
        }
    }

    /// The Core API reports some failures with HTTP 200 and a `status_code` body field.
    fn check_body_status(transaction: GatewayTransaction) -> Result<GatewayTransaction, GatewayError> {
        match transaction.status_code.as_deref() {
            Some("404") => Err(GatewayError::OrderNotFound),
            Some("412") => Err(GatewayError::InvalidState),
            Some(code) if code.starts_with('4') || code.starts_with('5') => Err(GatewayError::Api {
                status: code.parse().unwrap_or(0),
                message: transaction.status_message.unwrap_or_default(),
            }),
            _ => Ok(transaction),
        }
    }

    async fn core_request(
        &self,
        operation: &'static str,
        request: reqwest::RequestBuilder,
    ) -> Result<GatewayTransaction, GatewayError> {
        let timer = GATEWAY_REQUEST_DURATION
            .with_label_values(&[operation])
            .start_timer();
        let response = request
            .basic_auth(self.server_key.expose_secret(), None::<&str>)
            .header("Accept", "application/json")
            .send()
            .await?;
        timer.observe_duration();

        if !response.status().is_success() {
            return Err(Self::error_from(response).await);
        }
        let transaction: GatewayTransaction = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        Self::check_body_status(transaction)
    }
}

#[async_trait]
impl PaymentGateway for MidtransClient {
    #[instrument(skip(self, request), fields(order_id = %request.order_id))]
    async fn create_transaction(
        &self,
        request: &CheckoutRequest,
    ) -> Result<CheckoutSession, GatewayError> {
        let body = SnapTransactionBody {
            transaction_details: TransactionDetails {
                order_id: &request.order_id,
                gross_amount: request.gross_amount,
            },
            customer_details: &request.customer,
            item_details: &request.items,
            expiry: SnapExpiry {
                unit: "hours",
                duration: request.expiry_hours,
            },
        };

        let timer = GATEWAY_REQUEST_DURATION
            .with_label_values(&["create_transaction"])
            .start_timer();
        let response = self
            .client
            .post(format!("{}/snap/v1/transactions", self.snap_base_url))
            .basic_auth(self.server_key.expose_secret(), None::<&str>)
            .header("Accept", "application/json")
            .json(&body)
            .send()
            .await?;
        timer.observe_duration();

        if !response.status().is_success() {
            let err = Self::error_from(response).await;
            warn!(error = %err, "Snap transaction rejected");
            return Err(err);
        }

        let session: CheckoutSession = response
            .json()
            .await
            .map_err(|e| GatewayError::Parse(e.to_string()))?;
        info!("Snap transaction created");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn cancel(&self, order_id: &str) -> Result<GatewayTransaction, GatewayError> {
        let request = self
            .client
            .post(format!("{}/v2/{}/cancel", self.api_base_url, order_id));
        let transaction = self.core_request("cancel", request).await?;
        info!(status = ?transaction.transaction_status, "Order cancelled at gateway");
        Ok(transaction)
    }

    #[instrument(skip(self))]
    async fn status(&self, order_id: &str) -> Result<GatewayTransaction, GatewayError> {
        let request = self
            .client
            .get(format!("{}/v2/{}/status", self.api_base_url, order_id));
        self.core_request("status", request).await
    }

    fn verify_signature(&self, notification: &WebhookNotification) -> bool {
        verify_signature(notification, self.server_key.expose_secret())
    }
}
