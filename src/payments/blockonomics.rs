use reqwest::Client;
use serde::Deserialize;

use crate::crypto::constant_time_eq;
use crate::error::{AppError, Result};
use crate::models::BlockonomicsConfig;

#[derive(Debug, Deserialize)]
struct NewAddressResponse {
    address: String,
}

/// Query string of the Blockonomics HTTP callback.
///
/// Blockonomics calls the registered URL once per status change with
/// `status` 0 (unconfirmed), 1 (partially confirmed) or 2 (confirmed).
#[derive(Debug, Deserialize)]
pub struct BlockonomicsCallback {
    pub status: i64,
    pub addr: String,
    /// Amount received in satoshi
    pub value: i64,
    pub txid: String,
    /// Our shared secret, appended to the callback URL at registration
    #[serde(default)]
    pub secret: Option<String>,
}

impl BlockonomicsCallback {
    /// Replay key: one event per transaction per confirmation stage.
    pub fn event_id(&self) -> String {
        format!("{}:{}:{}", self.txid, self.addr, self.status)
    }
}

#[derive(Debug, Clone)]
pub struct BlockonomicsClient {
    client: Client,
    api_url: String,
    api_key: String,
    callback_secret: String,
}

impl BlockonomicsClient {
    pub fn new(client: Client, api_url: &str, config: &BlockonomicsConfig) -> Self {
        Self {
            client,
            api_url: api_url.to_string(),
            api_key: config.api_key.clone(),
            callback_secret: config.callback_secret.clone(),
        }
    }

    /// Derive a fresh deposit address from the merchant's xpub.
    pub async fn new_address(&self) -> Result<String> {
        let response = self
            .client
            .post(format!("{}/api/new_address", self.api_url))
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(AppError::Upstream(format!(
                "Blockonomics new_address returned {}: {}",
                status, error_text
            )));
        }

        let body: NewAddressResponse = response.json().await.map_err(|e| {
            AppError::Upstream(format!("Failed to parse Blockonomics response: {}", e))
        })?;

        if body.address.trim().is_empty() {
            return Err(AppError::Upstream("Blockonomics returned an empty address".into()));
        }
        Ok(body.address)
    }

    pub fn verify_callback_secret(&self, secret: Option<&str>) -> bool {
        match secret {
            Some(s) if !self.callback_secret.is_empty() => constant_time_eq(s, &self.callback_secret),
            _ => false,
        }
    }
}

/// BIP21 payment URI shown as a QR code.
pub fn payment_uri(address: &str, amount: &str) -> String {
    format!("bitcoin:{}?amount={}", address, amount)
}
