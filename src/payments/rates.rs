//! Cached USD exchange rates for the supported coins.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::Client;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::error::{AppError, Result};
use crate::models::CryptoCurrency;

/// Used only when no rate has ever been fetched.
pub const FALLBACK_BTC_USD: f64 = 60_000.0;
pub const FALLBACK_XMR_USD: f64 = 150.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateSource {
    /// Fetched by this call
    Live,
    /// Served from cache within the TTL
    Cached,
    /// Upstream failed, last known value
    Stale,
    /// Upstream failed and nothing was cached
    Fallback,
}

#[derive(Debug, Clone, Serialize)]
pub struct RateQuote {
    pub coin: CryptoCurrency,
    pub usd: f64,
    pub source: RateSource,
    /// Unix timestamp of the upstream fetch (None for fallback)
    pub fetched_at: Option<i64>,
}

impl RateQuote {
    pub fn is_fallback(&self) -> bool {
        matches!(self.source, RateSource::Fallback)
    }
}

#[derive(Debug, Clone, Copy)]
struct CachedRate {
    usd: f64,
    fetched: Instant,
    fetched_at: i64,
}

#[derive(Default)]
struct RateState {
    rates: HashMap<CryptoCurrency, CachedRate>,
    last_attempt: Option<Instant>,
    last_failed: bool,
}

pub struct ExchangeRates {
    http: Client,
    api_url: String,
    ttl: Duration,
    min_interval: Duration,
    state: Mutex<RateState>,
}

fn coingecko_id(coin: CryptoCurrency) -> &'static str {
    match coin {
        CryptoCurrency::Btc => "bitcoin",
        CryptoCurrency::Xmr => "monero",
    }
}

fn fallback_usd(coin: CryptoCurrency) -> f64 {
    match coin {
        CryptoCurrency::Btc => FALLBACK_BTC_USD,
        CryptoCurrency::Xmr => FALLBACK_XMR_USD,
    }
}

impl ExchangeRates {
    pub fn new(http: Client, api_url: &str, ttl: Duration, min_interval: Duration) -> Self {
        Self {
            http,
            api_url: api_url.trim_end_matches('/').to_string(),
            ttl,
            min_interval,
            state: Mutex::new(RateState::default()),
        }
    }

    /// Current USD price of `coin`.
    ///
    /// Never fails: upstream errors degrade to the last known value and then
    /// to the static fallback. Callers that must not price against a fallback
    /// check `RateQuote::is_fallback`.
    pub async fn quote(&self, coin: CryptoCurrency) -> RateQuote {
        // Held across the fetch so concurrent callers share one upstream request
        let mut state = self.state.lock().await;

        if let Some(cached) = state.rates.get(&coin)
            && cached.fetched.elapsed() < self.ttl
        {
            return cached_quote(coin, cached, RateSource::Cached);
        }

        if let Some(last) = state.last_attempt {
            let since = last.elapsed();
            if since < self.min_interval {
                // No point waiting to retry an upstream that just failed
                if state.last_failed {
                    return degraded_quote(&state, coin);
                }
                tokio::time::sleep(self.min_interval - since).await;
            }
        }
        state.last_attempt = Some(Instant::now());

        let fetched = self.fetch().await;
        state.last_failed = fetched.is_err();
        match fetched {
            Ok(prices) => {
                let fetched = Instant::now();
                let fetched_at = chrono::Utc::now().timestamp();
                for (c, usd) in prices {
                    state.rates.insert(
                        c,
                        CachedRate {
                            usd,
                            fetched,
                            fetched_at,
                        },
                    );
                }
                if let Some(cached) = state.rates.get(&coin)
                    && cached.fetched == fetched
                {
                    return cached_quote(coin, cached, RateSource::Live);
                }
                tracing::warn!("Rate source returned no price for {}", coin.as_ref());
            }
            Err(e) => {
                tracing::warn!("Exchange rate fetch failed: {}", e);
            }
        }

        degraded_quote(&state, coin)
    }

    pub async fn quote_all(&self) -> Vec<RateQuote> {
        let mut quotes = Vec::with_capacity(CryptoCurrency::ALL.len());
        for coin in CryptoCurrency::ALL {
            quotes.push(self.quote(coin).await);
        }
        quotes
    }

    /// One request for every supported coin.
    async fn fetch(&self) -> Result<Vec<(CryptoCurrency, f64)>> {
        let ids = CryptoCurrency::ALL
            .iter()
            .map(|c| coingecko_id(*c))
            .collect::<Vec<_>>()
            .join(",");

        let response = self
            .http
            .get(format!("{}/simple/price", self.api_url))
            .query(&[("ids", ids.as_str()), ("vs_currencies", "usd")])
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Rate API returned {}: {}",
                status, body
            )));
        }

        let body: HashMap<String, HashMap<String, f64>> = response.json().await?;

        Ok(CryptoCurrency::ALL
            .iter()
            .filter_map(|coin| {
                let usd = body.get(coingecko_id(*coin))?.get("usd").copied()?;
                (usd.is_finite() && usd > 0.0).then_some((*coin, usd))
            })
            .collect())
    }
}

/// Last known value, or the static fallback if there is none.
fn degraded_quote(state: &RateState, coin: CryptoCurrency) -> RateQuote {
    match state.rates.get(&coin) {
        Some(cached) => cached_quote(coin, cached, RateSource::Stale),
        None => {
            tracing::warn!(
                "Using fallback {} rate of {} USD",
                coin.as_ref(),
                fallback_usd(coin)
            );
            RateQuote {
                coin,
                usd: fallback_usd(coin),
                source: RateSource::Fallback,
                fetched_at: None,
            }
        }
    }
}

fn cached_quote(coin: CryptoCurrency, cached: &CachedRate, source: RateSource) -> RateQuote {
    RateQuote {
        coin,
        usd: cached.usd,
        source,
        fetched_at: Some(cached.fetched_at),
    }
}
