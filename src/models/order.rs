use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use super::{CryptoCurrency, Payment, PaymentMethod, PaymentStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Paid,
    Cancelled,
    Refunded,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub name: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    #[serde(default)]
    pub region: Option<String>,
    pub postal_code: String,
    pub country: String,
}

impl ShippingAddress {
    /// Returns the name of the first required field that is blank.
    pub fn missing_field(&self) -> Option<&'static str> {
        [
            ("name", &self.name),
            ("line1", &self.line1),
            ("city", &self.city),
            ("postal_code", &self.postal_code),
            ("country", &self.country),
        ]
        .into_iter()
        .find(|(_, v)| v.trim().is_empty())
        .map(|(k, _)| k)
    }
}

/// Gateway-specific data shown to the customer for the active payment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum PaymentDetails {
    Bitcoin {
        address: String,
        amount: String,
        exchange_rate: f64,
        expires_at: i64,
    },
    Monero {
        address: String,
        amount: String,
        nowpayments_payment_id: String,
        expires_at: i64,
    },
    PayPal {
        paypal_order_id: String,
        approve_url: Option<String>,
        capture_id: Option<String>,
    },
}

impl PaymentDetails {
    pub fn method(&self) -> PaymentMethod {
        match self {
            PaymentDetails::Bitcoin { .. } => PaymentMethod::Bitcoin,
            PaymentDetails::Monero { .. } => PaymentMethod::Monero,
            PaymentDetails::PayPal { .. } => PaymentMethod::PayPal,
        }
    }

    pub fn crypto_currency(&self) -> Option<CryptoCurrency> {
        self.method().crypto_currency()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub product_id: String,
    pub name: String,
    pub unit_price_cents: i64,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub user_id: String,
    pub email: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub total_cents: i64,
    pub currency: String,
    pub shipping_address: ShippingAddress,
    pub payment_details: Option<PaymentDetails>,
    #[serde(skip_serializing)]
    pub idempotency_key: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
    pub paid_at: Option<i64>,
}

impl Order {
    pub fn is_payable(&self) -> bool {
        matches!(self.status, OrderStatus::Pending)
            && !matches!(self.payment_status, PaymentStatus::Completed)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct OrderWithItems {
    #[serde(flatten)]
    pub order: Order,
    pub items: Vec<OrderItem>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub payments: Vec<Payment>,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutRequest {
    pub shipping_address: ShippingAddress,
    pub payment_method: PaymentMethod,
    /// Defaults to the account email
    #[serde(default)]
    pub email: Option<String>,
}

/// Input for `queries::create_order_from_cart`.
#[derive(Debug)]
pub struct CreateOrder {
    pub user_id: String,
    pub email: String,
    pub payment_method: PaymentMethod,
    pub shipping_address: ShippingAddress,
    pub idempotency_key: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AdminOrderQuery {
    #[serde(default)]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct Paginated<T> {
    pub items: Vec<T>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}
