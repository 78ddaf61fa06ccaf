use axum::{
    extract::{Query, State, rejection::QueryRejection},
    http::StatusCode,
};

use crate::db::{AppState, queries};
use crate::models::{GatewayProvider, PaymentMethod, ProviderUpdate};
use crate::payments::BlockonomicsCallback;
use crate::payments::load_gateway;
use crate::payments::status::{blockonomics_confirmations, resolve_crypto_status};

use super::acknowledge;

/// Blockonomics reports payments with a GET to the registered callback URL.
pub async fn handle_blockonomics_callback(
    State(state): State<AppState>,
    query: Result<Query<BlockonomicsCallback>, QueryRejection>,
) -> (StatusCode, &'static str) {
    let callback = match query {
        Ok(Query(c)) => c,
        Err(e) => {
            tracing::warn!("Malformed Blockonomics callback: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid callback");
        }
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let gateway = match load_gateway(&conn, &state.master_key, GatewayProvider::Blockonomics) {
        Ok(Some(g)) => g,
        Ok(None) => return (StatusCode::OK, "Gateway disabled"),
        Err(e) => {
            tracing::error!("Failed to load Blockonomics gateway: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Gateway error");
        }
    };

    let client = match gateway.blockonomics(&state) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("Blockonomics gateway misconfigured: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Gateway error");
        }
    };
    if !client.verify_callback_secret(callback.secret.as_deref()) {
        tracing::warn!("Blockonomics callback with bad secret for {}", callback.addr);
        return (StatusCode::UNAUTHORIZED, "Invalid secret");
    }

    let Some(confirmations) = blockonomics_confirmations(callback.status) else {
        return (StatusCode::BAD_REQUEST, "Unknown status");
    };
    if callback.value < 0 {
        return (StatusCode::BAD_REQUEST, "Invalid value");
    }

    let payment = match queries::get_payment_by_address(&conn, &callback.addr) {
        Ok(Some(p)) if p.method == PaymentMethod::Bitcoin => p,
        Ok(_) => {
            tracing::info!("Blockonomics callback for unknown address {}", callback.addr);
            return (StatusCode::OK, "Unknown address");
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let Some(expected) = payment.expected_atomic else {
        tracing::error!("Bitcoin payment {} has no expected amount", payment.id);
        return (StatusCode::OK, "Payment not priced");
    };

    let status = resolve_crypto_status(
        expected,
        callback.value,
        confirmations,
        &gateway.gateway.settings,
    );

    tracing::info!(
        "Blockonomics: {} sat to {} (tx {}, status {}) -> {}",
        callback.value,
        callback.addr,
        callback.txid,
        callback.status,
        status.as_ref()
    );

    acknowledge(
        &mut conn,
        &ProviderUpdate {
            payment_id: payment.id,
            status,
            received_atomic: Some(callback.value),
            confirmations: Some(confirmations),
            txid: Some(callback.txid.clone()),
            event: Some((GatewayProvider::Blockonomics, callback.event_id())),
        },
    )
}
