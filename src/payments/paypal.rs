use std::sync::Arc;
use std::time::Duration;

use axum::http::HeaderMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::PayPalConfig;

use super::status::{format_cents, parse_cents};

/// Tokens are refreshed this long before PayPal says they expire.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-auth-algo",
    "paypal-cert-url",
    "paypal-transmission-id",
    "paypal-transmission-sig",
    "paypal-transmission-time",
];

struct CachedToken {
    client_id: String,
    access_token: String,
    expires: Instant,
}

/// OAuth access tokens shared by every request handler.
#[derive(Default)]
pub struct PayPalTokenCache {
    inner: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Serialize)]
struct Amount {
    currency_code: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct PurchaseUnit<'a> {
    reference_id: &'a str,
    custom_id: &'a str,
    amount: Amount,
}

#[derive(Debug, Serialize)]
struct ApplicationContext<'a> {
    return_url: &'a str,
    cancel_url: &'a str,
    user_action: &'static str,
    shipping_preference: &'static str,
}

#[derive(Debug, Serialize)]
struct CreateOrderRequest<'a> {
    intent: &'static str,
    purchase_units: Vec<PurchaseUnit<'a>>,
    application_context: ApplicationContext<'a>,
}

#[derive(Debug, Deserialize)]
struct Link {
    href: String,
    rel: String,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    #[serde(default)]
    links: Vec<Link>,
}

#[derive(Debug, Deserialize)]
struct CaptureResponse {
    id: String,
    status: String,
    #[serde(default)]
    purchase_units: Vec<CapturedUnit>,
}

#[derive(Debug, Deserialize)]
struct CapturedUnit {
    #[serde(default)]
    payments: Option<CapturedPayments>,
}

#[derive(Debug, Deserialize)]
struct CapturedPayments {
    #[serde(default)]
    captures: Vec<CaptureDetail>,
}

#[derive(Debug, Deserialize)]
struct CaptureDetail {
    id: String,
    status: String,
    amount: Option<MoneyValue>,
}

#[derive(Debug, Deserialize)]
struct MoneyValue {
    currency_code: String,
    value: String,
}

#[derive(Debug, Serialize)]
struct VerifyWebhookRequest<'a> {
    auth_algo: &'a str,
    cert_url: &'a str,
    transmission_id: &'a str,
    transmission_sig: &'a str,
    transmission_time: &'a str,
    webhook_id: &'a str,
    webhook_event: &'a Value,
}

#[derive(Debug, Deserialize)]
struct VerifyWebhookResponse {
    verification_status: String,
}

#[derive(Debug, Clone)]
pub struct PayPalOrder {
    pub id: String,
    /// Where the buyer approves the payment
    pub approve_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct PayPalCapture {
    pub paypal_order_id: String,
    /// Order status, "COMPLETED" once funds are captured
    pub status: String,
    pub capture_id: Option<String>,
    /// Capture status ("COMPLETED", "PENDING", "DECLINED", ...)
    pub capture_status: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: Option<String>,
}

/// Webhook event envelope. `resource` depends on `event_type`.
#[derive(Debug, Clone, Deserialize)]
pub struct PayPalWebhookEvent {
    pub id: String,
    pub event_type: String,
    #[serde(default)]
    pub resource: Value,
}

impl PayPalWebhookEvent {
    /// PayPal order id the event refers to.
    ///
    /// Order events carry it as `resource.id`; capture events under
    /// `supplementary_data.related_ids.order_id`.
    pub fn paypal_order_id(&self) -> Option<&str> {
        if self.event_type.starts_with("CHECKOUT.ORDER.") {
            return self.resource.get("id").and_then(Value::as_str);
        }
        self.resource
            .pointer("/supplementary_data/related_ids/order_id")
            .and_then(Value::as_str)
    }

    /// Refunds and reversals. Their resource is the refund, not the capture.
    pub fn is_refund(&self) -> bool {
        matches!(
            self.event_type.as_str(),
            "PAYMENT.CAPTURE.REFUNDED" | "PAYMENT.CAPTURE.REVERSED"
        )
    }

    pub fn capture_id(&self) -> Option<&str> {
        if self.event_type.starts_with("PAYMENT.CAPTURE.") && !self.is_refund() {
            self.resource.get("id").and_then(Value::as_str)
        } else {
            None
        }
    }

    pub fn amount_cents(&self) -> Option<i64> {
        self.resource
            .pointer("/amount/value")
            .and_then(Value::as_str)
            .and_then(parse_cents)
    }
}

#[derive(Clone)]
pub struct PayPalClient {
    client: Client,
    api_url: String,
    config: PayPalConfig,
    tokens: Arc<PayPalTokenCache>,
}

impl PayPalClient {
    pub fn new(client: Client, api_url: &str, config: &PayPalConfig, tokens: Arc<PayPalTokenCache>) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            config: config.clone(),
            tokens,
        }
    }

    async fn access_token(&self) -> Result<String> {
        let mut cached = self.tokens.inner.lock().await;

        if let Some(token) = cached.as_ref()
            && token.client_id == self.config.client_id
            && token.expires > Instant::now() + TOKEN_REFRESH_MARGIN
        {
            return Ok(token.access_token.clone());
        }

        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_url))
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "PayPal token request returned {}: {}",
                status, error_text
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse PayPal token: {}", e)))?;

        *cached = Some(CachedToken {
            client_id: self.config.client_id.clone(),
            access_token: token.access_token.clone(),
            expires: Instant::now() + Duration::from_secs(token.expires_in),
        });
        Ok(token.access_token)
    }

    pub async fn create_order(
        &self,
        order_id: &str,
        amount_cents: i64,
        currency: &str,
        return_url: &str,
        cancel_url: &str,
        request_id: &str,
    ) -> Result<PayPalOrder> {
        let token = self.access_token().await?;
        let request = CreateOrderRequest {
            intent: "CAPTURE",
            purchase_units: vec![PurchaseUnit {
                reference_id: order_id,
                custom_id: order_id,
                amount: Amount {
                    currency_code: currency.to_uppercase(),
                    value: format_cents(amount_cents),
                },
            }],
            application_context: ApplicationContext {
                return_url,
                cancel_url,
                user_action: "PAY_NOW",
                shipping_preference: "NO_SHIPPING",
            },
        };

        let response = self
            .client
            .post(format!("{}/v2/checkout/orders", self.api_url))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", request_id)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "PayPal create order returned {}: {}",
                status, error_text
            )));
        }

        let order: OrderResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse PayPal order: {}", e)))?;

        let approve_url = order
            .links
            .into_iter()
            .find(|l| l.rel == "approve" || l.rel == "payer-action")
            .map(|l| l.href);

        Ok(PayPalOrder {
            id: order.id,
            approve_url,
        })
    }

    pub async fn capture_order(&self, paypal_order_id: &str, request_id: &str) -> Result<PayPalCapture> {
        let token = self.access_token().await?;

        let response = self
            .client
            .post(format!(
                "{}/v2/checkout/orders/{}/capture",
                self.api_url,
                urlencoding::encode(paypal_order_id)
            ))
            .bearer_auth(&token)
            .header("PayPal-Request-Id", request_id)
            .json(&serde_json::json!({}))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            if status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
                // Not approved yet, already captured, or declined instrument
                return Err(AppError::Conflict(format!(
                    "PayPal could not capture this order: {}",
                    error_text
                )));
            }
            return Err(AppError::Upstream(format!(
                "PayPal capture returned {}: {}",
                status, error_text
            )));
        }

        let body: CaptureResponse = response
            .json()
            .await
            .map_err(|e| AppError::Upstream(format!("Failed to parse PayPal capture: {}", e)))?;

        let capture = body
            .purchase_units
            .into_iter()
            .filter_map(|u| u.payments)
            .flat_map(|p| p.captures)
            .next();

        Ok(match capture {
            Some(c) => PayPalCapture {
                paypal_order_id: body.id,
                status: body.status,
                capture_id: Some(c.id),
                capture_status: Some(c.status),
                amount_cents: c.amount.as_ref().and_then(|a| parse_cents(&a.value)),
                currency: c.amount.map(|a| a.currency_code),
            },
            None => PayPalCapture {
                paypal_order_id: body.id,
                status: body.status,
                capture_id: None,
                capture_status: None,
                amount_cents: None,
                currency: None,
            },
        })
    }

    /// Ask PayPal whether a webhook delivery is authentic.
    /// Missing transmission headers fail verification without a network call.
    pub async fn verify_webhook(&self, headers: &HeaderMap, event: &Value) -> Result<bool> {
        if self.config.webhook_id.is_empty() {
            return Ok(false);
        }

        let mut values = Vec::with_capacity(TRANSMISSION_HEADERS.len());
        for name in TRANSMISSION_HEADERS {
            match headers.get(name).and_then(|v| v.to_str().ok()) {
                Some(v) => values.push(v),
                None => return Ok(false),
            }
        }

        let token = self.access_token().await?;
        let request = VerifyWebhookRequest {
            auth_algo: values[0],
            cert_url: values[1],
            transmission_id: values[2],
            transmission_sig: values[3],
            transmission_time: values[4],
            webhook_id: &self.config.webhook_id,
            webhook_event: event,
        };

        let response = self
            .client
            .post(format!(
                "{}/v1/notifications/verify-webhook-signature",
                self.api_url
            ))
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "PayPal webhook verification returned {}: {}",
                status, error_text
            )));
        }

        let body: VerifyWebhookResponse = response.json().await.map_err(|e| {
            AppError::Upstream(format!("Failed to parse PayPal verification: {}", e))
        })?;
        Ok(body.verification_status == "SUCCESS")
    }
}
