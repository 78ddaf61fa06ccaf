pub mod blockonomics;
pub mod nowpayments;
pub mod paypal;
pub mod processing;
pub mod rates;
pub mod status;

pub use blockonomics::{BlockonomicsCallback, BlockonomicsClient};
pub use nowpayments::{NowPaymentsClient, NowPaymentsInvoice, NowPaymentsIpn};
pub use paypal::{PayPalCapture, PayPalClient, PayPalOrder, PayPalTokenCache, PayPalWebhookEvent};
pub use rates::{ExchangeRates, RateQuote, RateSource};

use rusqlite::Connection;

use crate::config::GatewayBootstrap;
use crate::crypto::MasterKey;
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::{
    BlockonomicsConfig, GatewayCredentials, GatewayProvider, NowPaymentsConfig, PayPalConfig,
    PaymentGateway, UpdateGateway,
};

/// Base URLs of the payment provider APIs.
#[derive(Debug, Clone)]
pub struct ProviderEndpoints {
    pub blockonomics: String,
    pub nowpayments: String,
    pub paypal: String,
}

/// An enabled gateway with its decrypted credentials.
#[derive(Debug, Clone)]
pub struct ActiveGateway {
    pub gateway: PaymentGateway,
    pub credentials: GatewayCredentials,
}

pub fn encrypt_credentials(master_key: &MasterKey, credentials: &GatewayCredentials) -> Result<Vec<u8>> {
    let plaintext = serde_json::to_vec(credentials)?;
    master_key.encrypt(&credentials.provider().encryption_context(), &plaintext)
}

pub fn decrypt_credentials(
    master_key: &MasterKey,
    gateway: &PaymentGateway,
) -> Result<Option<GatewayCredentials>> {
    let Some(blob) = &gateway.credentials_encrypted else {
        return Ok(None);
    };
    let plaintext = master_key.decrypt(&gateway.provider.encryption_context(), blob)?;
    let credentials: GatewayCredentials = serde_json::from_slice(&plaintext)?;
    if credentials.provider() != gateway.provider {
        return Err(AppError::Internal(format!(
            "Stored credentials for {} belong to {}",
            gateway.provider.as_ref(),
            credentials.provider().as_ref()
        )));
    }
    Ok(Some(credentials))
}

/// Load a gateway if it is enabled and has credentials.
pub fn load_gateway(
    conn: &Connection,
    master_key: &MasterKey,
    provider: GatewayProvider,
) -> Result<Option<ActiveGateway>> {
    let Some(gateway) = queries::get_gateway(conn, provider)? else {
        return Ok(None);
    };
    if !gateway.enabled {
        return Ok(None);
    }
    Ok(decrypt_credentials(master_key, &gateway)?.map(|credentials| ActiveGateway {
        gateway,
        credentials,
    }))
}

/// Like `load_gateway`, for customer-facing calls that cannot proceed without it.
pub fn require_gateway(
    conn: &Connection,
    master_key: &MasterKey,
    provider: GatewayProvider,
) -> Result<ActiveGateway> {
    load_gateway(conn, master_key, provider)?.ok_or_else(|| {
        AppError::ServiceUnavailable(format!(
            "Payments through {} are not available",
            provider.as_ref()
        ))
    })
}

fn credentials_mismatch(provider: GatewayProvider) -> AppError {
    AppError::Internal(format!("Gateway {} has foreign credentials", provider.as_ref()))
}

impl ActiveGateway {
    pub fn blockonomics(&self, state: &AppState) -> Result<BlockonomicsClient> {
        match &self.credentials {
            GatewayCredentials::Blockonomics(c) => Ok(BlockonomicsClient::new(
                state.http.clone(),
                &state.endpoints.blockonomics,
                c,
            )),
            _ => Err(credentials_mismatch(self.gateway.provider)),
        }
    }

    pub fn nowpayments(&self, state: &AppState) -> Result<NowPaymentsClient> {
        match &self.credentials {
            GatewayCredentials::NowPayments(c) => Ok(NowPaymentsClient::new(
                state.http.clone(),
                &state.endpoints.nowpayments,
                c,
            )),
            _ => Err(credentials_mismatch(self.gateway.provider)),
        }
    }

    pub fn paypal(&self, state: &AppState) -> Result<PayPalClient> {
        match &self.credentials {
            GatewayCredentials::PayPal(c) => Ok(PayPalClient::new(
                state.http.clone(),
                &state.endpoints.paypal,
                c,
                state.paypal_tokens.clone(),
            )),
            _ => Err(credentials_mismatch(self.gateway.provider)),
        }
    }
}

/// Credentials from the environment, for the providers that have a complete set.
fn bootstrap_credentials(env: &GatewayBootstrap) -> Vec<GatewayCredentials> {
    let mut found = Vec::new();

    match (&env.blockonomics_api_key, &env.blockonomics_callback_secret) {
        (Some(api_key), Some(callback_secret)) => {
            found.push(GatewayCredentials::Blockonomics(BlockonomicsConfig {
                api_key: api_key.clone(),
                callback_secret: callback_secret.clone(),
            }))
        }
        (None, None) => {}
        _ => tracing::warn!(
            "Ignoring partial Blockonomics credentials (need BLOCKONOMICS_API_KEY and BLOCKONOMICS_CALLBACK_SECRET)"
        ),
    }

    match (&env.nowpayments_api_key, &env.nowpayments_ipn_secret) {
        (Some(api_key), Some(ipn_secret)) => {
            found.push(GatewayCredentials::NowPayments(NowPaymentsConfig {
                api_key: api_key.clone(),
                ipn_secret: ipn_secret.clone(),
            }))
        }
        (None, None) => {}
        _ => tracing::warn!(
            "Ignoring partial NowPayments credentials (need NOWPAYMENTS_API_KEY and NOWPAYMENTS_IPN_SECRET)"
        ),
    }

    match (
        &env.paypal_client_id,
        &env.paypal_client_secret,
        &env.paypal_webhook_id,
    ) {
        (Some(client_id), Some(client_secret), Some(webhook_id)) => {
            found.push(GatewayCredentials::PayPal(PayPalConfig {
                client_id: client_id.clone(),
                client_secret: client_secret.clone(),
                webhook_id: webhook_id.clone(),
            }))
        }
        (None, None, None) => {}
        _ => tracing::warn!(
            "Ignoring partial PayPal credentials (need PAYPAL_CLIENT_ID, PAYPAL_CLIENT_SECRET and PAYPAL_WEBHOOK_ID)"
        ),
    }

    found
}

/// Make sure every gateway row exists, then store and enable any
/// credentials supplied through the environment.
pub fn bootstrap_gateways(
    conn: &Connection,
    master_key: &MasterKey,
    env: &GatewayBootstrap,
) -> Result<usize> {
    for provider in GatewayProvider::ALL {
        queries::ensure_gateway(conn, provider)?;
    }

    let credentials = bootstrap_credentials(env);
    for creds in &credentials {
        let provider = creds.provider();
        let encrypted = encrypt_credentials(master_key, creds)?;
        queries::update_gateway(
            conn,
            provider,
            &UpdateGateway {
                enabled: Some(true),
                required_confirmations: None,
                payment_window_minutes: None,
                underpayment_tolerance_bps: None,
                credentials: None,
            },
            Some(encrypted),
        )?;
        tracing::info!("Configured {} gateway from environment", provider.as_ref());
    }
    Ok(credentials.len())
}
