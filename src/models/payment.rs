use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::GatewayProvider;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    AwaitingConfirmation,
    Completed,
    Underpaid,
    Expired,
    Failed,
    Refunded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum PaymentMethod {
    Bitcoin,
    Monero,
    PayPal,
}

impl PaymentMethod {
    pub fn provider(&self) -> GatewayProvider {
        match self {
            PaymentMethod::Bitcoin => GatewayProvider::Blockonomics,
            PaymentMethod::Monero => GatewayProvider::NowPayments,
            PaymentMethod::PayPal => GatewayProvider::PayPal,
        }
    }

    pub fn crypto_currency(&self) -> Option<CryptoCurrency> {
        match self {
            PaymentMethod::Bitcoin => Some(CryptoCurrency::Btc),
            PaymentMethod::Monero => Some(CryptoCurrency::Xmr),
            PaymentMethod::PayPal => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum CryptoCurrency {
    Btc,
    Xmr,
}

impl CryptoCurrency {
    pub const ALL: [CryptoCurrency; 2] = [CryptoCurrency::Btc, CryptoCurrency::Xmr];

    /// Number of decimal places of the smallest unit (satoshi, piconero).
    pub fn decimals(&self) -> u32 {
        match self {
            CryptoCurrency::Btc => 8,
            CryptoCurrency::Xmr => 12,
        }
    }

    pub fn atomic_per_coin(&self) -> i64 {
        10_i64.pow(self.decimals())
    }
}

/// One attempt to pay an order through a specific gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    pub currency: String,
    pub crypto_currency: Option<CryptoCurrency>,
    /// Amount due in atomic units (satoshi / piconero)
    pub expected_atomic: Option<i64>,
    pub received_atomic: Option<i64>,
    pub exchange_rate: Option<f64>,
    pub address: Option<String>,
    /// NowPayments payment id or PayPal order id
    pub provider_ref: Option<String>,
    pub txid: Option<String>,
    pub confirmations: i64,
    pub expires_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
    pub completed_at: Option<i64>,
}

impl Payment {
    /// A reserved row the provider has not yet filled in.
    pub fn is_reserved(&self) -> bool {
        self.address.is_none() && self.provider_ref.is_none()
    }

    pub fn is_past_expiry(&self, now: i64) -> bool {
        self.expires_at.is_some_and(|exp| now > exp)
    }

    pub fn funds_observed(&self) -> bool {
        self.received_atomic.unwrap_or(0) > 0
            || matches!(
                self.status,
                PaymentStatus::AwaitingConfirmation | PaymentStatus::Underpaid
            )
    }
}

/// Fields the provider returned when the payment was set up.
#[derive(Debug, Clone)]
pub struct PaymentInstructions {
    pub crypto_currency: Option<CryptoCurrency>,
    pub expected_atomic: Option<i64>,
    pub exchange_rate: Option<f64>,
    pub address: Option<String>,
    pub provider_ref: Option<String>,
    pub expires_at: Option<i64>,
}

/// Response body for payment creation endpoints.
#[derive(Debug, Serialize)]
pub struct PaymentResponse {
    pub payment_id: String,
    pub order_id: String,
    pub method: PaymentMethod,
    pub status: PaymentStatus,
    pub amount_cents: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_currency: Option<CryptoCurrency>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crypto_amount: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exchange_rate: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

/// A status change reported by a provider (webhook or capture call).
#[derive(Debug, Clone)]
pub struct ProviderUpdate {
    pub payment_id: String,
    pub status: PaymentStatus,
    pub received_atomic: Option<i64>,
    pub confirmations: Option<i64>,
    pub txid: Option<String>,
    /// `(provider, event id)` for replay protection
    pub event: Option<(GatewayProvider, String)>,
}

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub order_id: String,
}
