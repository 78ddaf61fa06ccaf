use std::env;

/// Production endpoints, overridable per environment (sandboxes, tests).
pub const DEFAULT_RATES_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const DEFAULT_BLOCKONOMICS_API_URL: &str = "https://www.blockonomics.co";
pub const DEFAULT_NOWPAYMENTS_API_URL: &str = "https://api.nowpayments.io";
pub const DEFAULT_PAYPAL_API_URL: &str = "https://api-m.paypal.com";

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub database_path: String,
    /// Public URL of this API, used to build provider callback URLs
    pub base_url: String,
    /// Storefront URL, used for PayPal return/cancel pages
    pub frontend_url: String,
    pub dev_mode: bool,
    pub jwt_secret: Option<String>,
    pub jwt_ttl_hours: u64,
    /// Base64-encoded 32-byte key for gateway credentials at rest
    pub master_key: Option<String>,
    pub bootstrap_admin_email: Option<String>,
    pub rates_api_url: String,
    pub rates_ttl_secs: u64,
    pub rates_min_interval_ms: u64,
    pub blockonomics_api_url: String,
    pub nowpayments_api_url: String,
    pub paypal_api_url: String,
    pub http_timeout_secs: u64,
    /// Seconds between background expiry sweeps (0 = disabled)
    pub expiry_sweep_secs: u64,
    pub rate_limit_per_minute: u32,
    pub bootstrap: GatewayBootstrap,
}

/// Gateway credentials supplied through the environment.
/// Upserted into the gateway table on startup when present.
#[derive(Debug, Clone, Default)]
pub struct GatewayBootstrap {
    pub blockonomics_api_key: Option<String>,
    pub blockonomics_callback_secret: Option<String>,
    pub nowpayments_api_key: Option<String>,
    pub nowpayments_ipn_secret: Option<String>,
    pub paypal_client_id: Option<String>,
    pub paypal_client_secret: Option<String>,
    pub paypal_webhook_id: Option<String>,
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        let dev_mode = env::var("STOREFRONT_ENV")
            .map(|v| v == "dev" || v == "development")
            .unwrap_or(false);

        let host = env_or("HOST", "127.0.0.1");
        let port: u16 = env_parse("PORT", 3000);

        let base_url = env::var("BASE_URL")
            .unwrap_or_else(|_| format!("http://{}:{}", host, port));
        let frontend_url = env::var("FRONTEND_URL").unwrap_or_else(|_| base_url.clone());

        Self {
            host,
            port,
            database_path: env_or("DATABASE_PATH", "storefront.db"),
            base_url: base_url.trim_end_matches('/').to_string(),
            frontend_url: frontend_url.trim_end_matches('/').to_string(),
            dev_mode,
            jwt_secret: env_opt("JWT_SECRET"),
            jwt_ttl_hours: env_parse("JWT_TTL_HOURS", 24),
            master_key: env_opt("MASTER_KEY"),
            bootstrap_admin_email: env_opt("BOOTSTRAP_ADMIN_EMAIL"),
            rates_api_url: env_or("RATES_API_URL", DEFAULT_RATES_API_URL),
            rates_ttl_secs: env_parse("RATES_TTL_SECS", 300),
            rates_min_interval_ms: env_parse("RATES_MIN_INTERVAL_MS", 1000),
            blockonomics_api_url: env_or("BLOCKONOMICS_API_URL", DEFAULT_BLOCKONOMICS_API_URL),
            nowpayments_api_url: env_or("NOWPAYMENTS_API_URL", DEFAULT_NOWPAYMENTS_API_URL),
            paypal_api_url: env_or("PAYPAL_API_URL", DEFAULT_PAYPAL_API_URL),
            http_timeout_secs: env_parse("HTTP_TIMEOUT_SECS", 15),
            expiry_sweep_secs: env_parse("EXPIRY_SWEEP_SECS", 60),
            rate_limit_per_minute: env_parse("RATE_LIMIT_PER_MINUTE", 60),
            bootstrap: GatewayBootstrap {
                blockonomics_api_key: env_opt("BLOCKONOMICS_API_KEY"),
                blockonomics_callback_secret: env_opt("BLOCKONOMICS_CALLBACK_SECRET"),
                nowpayments_api_key: env_opt("NOWPAYMENTS_API_KEY"),
                nowpayments_ipn_secret: env_opt("NOWPAYMENTS_IPN_SECRET"),
                paypal_client_id: env_opt("PAYPAL_CLIENT_ID"),
                paypal_client_secret: env_opt("PAYPAL_CLIENT_SECRET"),
                paypal_webhook_id: env_opt("PAYPAL_WEBHOOK_ID"),
            },
        }
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
