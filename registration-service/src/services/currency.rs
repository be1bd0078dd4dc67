//! USD to IDR quotes.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use secrecy::{ExposeSecret, Secret};
use serde_json::Value;
use tracing::instrument;

use crate::config::OracleConfig;
use crate::error::OracleError;
use crate::services::metrics::GATEWAY_REQUEST_DURATION;

/// Smallest and largest gross amount the gateway accepts, in IDR.
pub const MIN_IDR_AMOUNT: i64 = 1_000;
pub const MAX_IDR_AMOUNT: i64 = 999_999_999;

#[derive(Debug, Clone, PartialEq)]
pub struct FxQuote {
    /// IDR per USD.
    pub rate: Decimal,
    pub idr_amount: Decimal,
    pub quoted_at: DateTime<Utc>,
}

#[async_trait]
pub trait CurrencyOracle: Send + Sync {
    async fn quote_usd_to_idr(&self, usd_amount: Decimal) -> Result<FxQuote, OracleError>;
}

/// Round a quoted amount to whole rupiah and check the gateway bounds.
pub fn whole_idr(amount: Decimal) -> Option<i64> {
    amount
        .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        .to_i64()
        .filter(|v| (MIN_IDR_AMOUNT..=MAX_IDR_AMOUNT).contains(v))
}

/// Oracle backed by an exchange-rate HTTP API.
#[derive(Clone)]
pub struct HttpCurrencyOracle {
    client: Client,
    url: String,
    api_key: Secret<String>,
}

impl HttpCurrencyOracle {
    pub fn new(config: &OracleConfig) -> Result<Self, OracleError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.clone(),
            api_key: config.api_key.clone(),
        })
    }

    /// Pull the IDR rate out of the common response shapes
    /// (`rates`, `conversion_rates` or `data`).
    fn extract_rate(body: &Value) -> Result<Decimal, OracleError> {
        let raw = ["rates", "conversion_rates", "data"]
            .iter()
            .find_map(|key| body.get(key).and_then(|m| m.get("IDR")))
            .ok_or_else(|| OracleError::Parse("IDR rate missing".into()))?;

        let text = match raw {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.trim().to_string(),
            other => return Err(OracleError::Parse(format!("unexpected rate value {other}"))),
        };
        let rate = Decimal::from_str(&text)
            .or_else(|_| Decimal::from_scientific(&text))
            .map_err(|e| OracleError::Parse(e.to_string()))?;

        if rate <= Decimal::ZERO {
            return Err(OracleError::Parse(format!("non-positive rate {rate}")));
        }
        Ok(rate)
    }
}

#[async_trait]
impl CurrencyOracle for HttpCurrencyOracle {
    #[instrument(skip(self))]
    async fn quote_usd_to_idr(&self, usd_amount: Decimal) -> Result<FxQuote, OracleError> {
        let timer = GATEWAY_REQUEST_DURATION
            .with_label_values(&["currency_quote"])
            .start_timer();

        let response = self
            .client
            .get(&self.url)
            .query(&[("base", "USD"), ("symbols", "IDR")])
            .header("apikey", self.api_key.expose_secret())
            .send()
            .await?;
        timer.observe_duration();

        if !response.status().is_success() {
            return Err(OracleError::Status(response.status().as_u16()));
        }
        let body: Value = response
            .json()
            .await
            .map_err(|e| OracleError::Parse(e.to_string()))?;
        let rate = Self::extract_rate(&body)?;

        Ok(FxQuote {
            rate,
            idr_amount: usd_amount * rate,
            quoted_at: Utc::now(),
        })
    }
}

/// Fixed-rate oracle for development and tests.
#[derive(Debug, Clone)]
pub struct StaticRateOracle {
    rate: Decimal,
}

impl StaticRateOracle {
    pub fn new(rate: Decimal) -> Self {
        Self { rate }
    }
}

#[async_trait]
impl CurrencyOracle for StaticRateOracle {
    async fn quote_usd_to_idr(&self, usd_amount: Decimal) -> Result<FxQuote, OracleError> {
        Ok(FxQuote {
            rate: self.rate,
            idr_amount: usd_amount * self.rate,
            quoted_at: Utc::now(),
        })
    }
}
