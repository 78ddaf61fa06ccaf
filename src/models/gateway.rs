use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, AsRefStr, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum GatewayProvider {
    Blockonomics,
    NowPayments,
    PayPal,
}

impl GatewayProvider {
    pub const ALL: [GatewayProvider; 3] = [
        GatewayProvider::Blockonomics,
        GatewayProvider::NowPayments,
        GatewayProvider::PayPal,
    ];

    /// Context string binding encrypted credentials to their provider.
    pub fn encryption_context(&self) -> String {
        format!("gateway-credentials:{}", self.as_ref())
    }

    /// Highest confirmation count the provider ever reports to us.
    pub fn max_confirmations(&self) -> i64 {
        match self {
            // Callback status 2 stands for "2 or more"
            GatewayProvider::Blockonomics => 2,
            GatewayProvider::NowPayments | GatewayProvider::PayPal => 0,
        }
    }

    pub fn defaults(&self) -> GatewaySettings {
        match self {
            // Blockonomics reports status 2 once a transaction has 2+ confirmations
            GatewayProvider::Blockonomics => GatewaySettings {
                required_confirmations: 2,
                payment_window_minutes: 30,
                underpayment_tolerance_bps: 100,
            },
            // NowPayments tracks confirmations itself and only reports `finished`
            GatewayProvider::NowPayments => GatewaySettings {
                required_confirmations: 0,
                payment_window_minutes: 60,
                underpayment_tolerance_bps: 100,
            },
            GatewayProvider::PayPal => GatewaySettings {
                required_confirmations: 0,
                payment_window_minutes: 180,
                underpayment_tolerance_bps: 0,
            },
        }
    }
}

/// Per-provider thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GatewaySettings {
    pub required_confirmations: i64,
    pub payment_window_minutes: i64,
    /// Accepted shortfall in basis points (100 = 1%)
    pub underpayment_tolerance_bps: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentGateway {
    pub provider: GatewayProvider,
    pub enabled: bool,
    #[serde(flatten)]
    pub settings: GatewaySettings,
    #[serde(skip_serializing)]
    pub credentials_encrypted: Option<Vec<u8>>,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockonomicsConfig {
    pub api_key: String,
    /// Shared secret appended to the callback URL registered with Blockonomics
    pub callback_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NowPaymentsConfig {
    pub api_key: String,
    pub ipn_secret: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PayPalConfig {
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum GatewayCredentials {
    Blockonomics(BlockonomicsConfig),
    NowPayments(NowPaymentsConfig),
    PayPal(PayPalConfig),
}

impl GatewayCredentials {
    pub fn provider(&self) -> GatewayProvider {
        match self {
            GatewayCredentials::Blockonomics(_) => GatewayProvider::Blockonomics,
            GatewayCredentials::NowPayments(_) => GatewayProvider::NowPayments,
            GatewayCredentials::PayPal(_) => GatewayProvider::PayPal,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct UpdateGateway {
    pub enabled: Option<bool>,
    pub required_confirmations: Option<i64>,
    pub payment_window_minutes: Option<i64>,
    pub underpayment_tolerance_bps: Option<i64>,
    pub credentials: Option<GatewayCredentials>,
}

/// Mask a secret, preserving a short prefix for identification.
pub fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= 12 {
        return "*".repeat(len.max(4));
    }
    let prefix: String = secret.chars().take(8).collect();
    let suffix: String = secret.chars().skip(len - 4).collect();
    format!("{}...{}", prefix, suffix)
}

#[derive(Debug, Serialize)]
pub struct BlockonomicsConfigMasked {
    pub api_key: String,
    pub callback_secret: String,
}

impl From<&BlockonomicsConfig> for BlockonomicsConfigMasked {
    fn from(c: &BlockonomicsConfig) -> Self {
        Self {
            api_key: mask_secret(&c.api_key),
            callback_secret: mask_secret(&c.callback_secret),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct NowPaymentsConfigMasked {
    pub api_key: String,
    pub ipn_secret: String,
}

impl From<&NowPaymentsConfig> for NowPaymentsConfigMasked {
    fn from(c: &NowPaymentsConfig) -> Self {
        Self {
            api_key: mask_secret(&c.api_key),
            ipn_secret: mask_secret(&c.ipn_secret),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PayPalConfigMasked {
    /// Client id is not secret
    pub client_id: String,
    pub client_secret: String,
    pub webhook_id: String,
}

impl From<&PayPalConfig> for PayPalConfigMasked {
    fn from(c: &PayPalConfig) -> Self {
        Self {
            client_id: c.client_id.clone(),
            client_secret: mask_secret(&c.client_secret),
            webhook_id: c.webhook_id.clone(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(tag = "provider", rename_all = "lowercase")]
pub enum GatewayCredentialsMasked {
    Blockonomics(BlockonomicsConfigMasked),
    NowPayments(NowPaymentsConfigMasked),
    PayPal(PayPalConfigMasked),
}

impl From<&GatewayCredentials> for GatewayCredentialsMasked {
    fn from(c: &GatewayCredentials) -> Self {
        match c {
            GatewayCredentials::Blockonomics(c) => Self::Blockonomics(c.into()),
            GatewayCredentials::NowPayments(c) => Self::NowPayments(c.into()),
            GatewayCredentials::PayPal(c) => Self::PayPal(c.into()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GatewayView {
    #[serde(flatten)]
    pub gateway: PaymentGateway,
    pub credentials: Option<GatewayCredentialsMasked>,
}
