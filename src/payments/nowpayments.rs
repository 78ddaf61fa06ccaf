use reqwest::Client;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::crypto::{constant_time_eq, hmac_sha512_hex};
use crate::error::{AppError, Result};
use crate::models::{CryptoCurrency, NowPaymentsConfig};

use super::status::{decimal_to_atomic, format_cents};

#[derive(Debug, Serialize)]
struct CreatePaymentRequest<'a> {
    price_amount: String,
    price_currency: &'a str,
    pay_currency: &'a str,
    order_id: &'a str,
    order_description: String,
    ipn_callback_url: &'a str,
}

/// NowPayments sends ids as strings in some responses and numbers in others.
fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

fn opt_amount<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Option<String>, D::Error> {
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(other) => Err(serde::de::Error::custom(format!(
            "expected amount, got {}",
            other
        ))),
    }
}

#[derive(Debug, Deserialize)]
struct CreatePaymentResponse {
    #[serde(deserialize_with = "string_or_number")]
    payment_id: String,
    pay_address: String,
    #[serde(default, deserialize_with = "opt_amount")]
    pay_amount: Option<String>,
    payment_status: String,
}

/// A Monero invoice created at NowPayments.
#[derive(Debug, Clone)]
pub struct NowPaymentsInvoice {
    pub payment_id: String,
    pub pay_address: String,
    pub pay_amount_atomic: i64,
    pub payment_status: String,
}

/// Body of an instant payment notification (IPN).
#[derive(Debug, Clone, Deserialize)]
pub struct NowPaymentsIpn {
    #[serde(deserialize_with = "string_or_number")]
    pub payment_id: String,
    pub payment_status: String,
    #[serde(default)]
    pub pay_address: Option<String>,
    #[serde(default, deserialize_with = "opt_amount")]
    pub pay_amount: Option<String>,
    #[serde(default, deserialize_with = "opt_amount")]
    pub actually_paid: Option<String>,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default, deserialize_with = "opt_amount")]
    pub outcome_amount: Option<String>,
}

impl NowPaymentsIpn {
    pub fn actually_paid_atomic(&self) -> Option<i64> {
        self.actually_paid
            .as_deref()
            .and_then(|a| decimal_to_atomic(a, CryptoCurrency::Xmr))
    }

    /// Replay key: NowPayments repeats a notification until it gets a 200.
    pub fn event_id(&self) -> String {
        format!(
            "{}:{}:{}",
            self.payment_id,
            self.payment_status,
            self.actually_paid.as_deref().unwrap_or("0")
        )
    }
}

#[derive(Debug, Clone)]
pub struct NowPaymentsClient {
    client: Client,
    api_url: String,
    api_key: String,
    ipn_secret: String,
}

impl NowPaymentsClient {
    pub fn new(client: Client, api_url: &str, config: &NowPaymentsConfig) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            api_key: config.api_key.clone(),
            ipn_secret: config.ipn_secret.clone(),
        }
    }

    pub async fn create_payment(
        &self,
        order_id: &str,
        price_cents: i64,
        ipn_callback_url: &str,
    ) -> Result<NowPaymentsInvoice> {
        let request = CreatePaymentRequest {
            price_amount: format_cents(price_cents),
            price_currency: "usd",
            pay_currency: "xmr",
            order_id,
            order_description: format!("Order {}", order_id),
            ipn_callback_url,
        };

        let response = self
            .client
            .post(format!("{}/v1/payment", self.api_url))
            .header("x-api-key", &self.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "NowPayments create payment returned {}: {}",
                status, error_text
            )));
        }

        let body: CreatePaymentResponse = response.json().await.map_err(|e| {
            AppError::Upstream(format!("Failed to parse NowPayments response: {}", e))
        })?;

        let pay_amount_atomic = body
            .pay_amount
            .as_deref()
            .and_then(|a| decimal_to_atomic(a, CryptoCurrency::Xmr))
            .filter(|a| *a > 0)
            .ok_or_else(|| AppError::Upstream("NowPayments returned no pay_amount".into()))?;

        Ok(NowPaymentsInvoice {
            payment_id: body.payment_id,
            pay_address: body.pay_address,
            pay_amount_atomic,
            payment_status: body.payment_status,
        })
    }

    /// Check `x-nowpayments-sig`: HMAC-SHA512 over the body with keys sorted.
    pub fn verify_ipn_signature(&self, body: &[u8], signature: &str) -> Result<bool> {
        if self.ipn_secret.is_empty() {
            return Ok(false);
        }
        let value: Value = serde_json::from_slice(body)
            .map_err(|e| AppError::BadRequest(format!("Invalid IPN body: {}", e)))?;
        let canonical = serde_json::to_string(&sort_keys(value))?;
        let expected = hmac_sha512_hex(self.ipn_secret.as_bytes(), canonical.as_bytes())?;
        Ok(constant_time_eq(&expected, &signature.trim().to_ascii_lowercase()))
    }
}

/// Recursively order object keys, matching how NowPayments signs IPNs.
pub fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k, sort_keys(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
