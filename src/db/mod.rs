pub mod from_row;
pub mod queries;
mod schema;

use std::sync::Arc;
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;

use crate::config::Config;
use crate::crypto::MasterKey;
use crate::error::{AppError, Result};
use crate::jwt::SessionKeys;
use crate::middleware::ClientRateLimiter;
use crate::payments::{ExchangeRates, PayPalTokenCache, ProviderEndpoints};

pub type DbPool = Pool<SqliteConnectionManager>;

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    /// Public URL of this API (webhook callbacks)
    pub base_url: String,
    /// Storefront URL (PayPal return/cancel pages)
    pub frontend_url: String,
    pub master_key: MasterKey,
    pub sessions: SessionKeys,
    pub rates: Arc<ExchangeRates>,
    pub endpoints: ProviderEndpoints,
    pub http: reqwest::Client,
    pub paypal_tokens: Arc<PayPalTokenCache>,
    pub rate_limiter: Arc<ClientRateLimiter>,
    pub bootstrap_admin_email: Option<String>,
}

impl AppState {
    pub fn new(config: &Config, db: DbPool, master_key: MasterKey, sessions: SessionKeys) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .user_agent(concat!("storefront/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        let rates = ExchangeRates::new(
            http.clone(),
            &config.rates_api_url,
            Duration::from_secs(config.rates_ttl_secs),
            Duration::from_millis(config.rates_min_interval_ms),
        );

        Ok(Self {
            db,
            base_url: config.base_url.clone(),
            frontend_url: config.frontend_url.clone(),
            master_key,
            sessions,
            rates: Arc::new(rates),
            endpoints: ProviderEndpoints {
                blockonomics: config.blockonomics_api_url.trim_end_matches('/').to_string(),
                nowpayments: config.nowpayments_api_url.trim_end_matches('/').to_string(),
                paypal: config.paypal_api_url.trim_end_matches('/').to_string(),
            },
            http,
            paypal_tokens: Arc::new(PayPalTokenCache::default()),
            rate_limiter: Arc::new(ClientRateLimiter::per_minute(config.rate_limit_per_minute)),
            bootstrap_admin_email: config.bootstrap_admin_email.clone(),
        })
    }
}

/// Open a pooled SQLite database with WAL, foreign keys and a busy timeout.
pub fn create_pool(path: &str) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|conn| {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
    });
    Ok(Pool::builder().max_size(8).build(manager)?)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(schema::SCHEMA)?;
    Ok(())
}
