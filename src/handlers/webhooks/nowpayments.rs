use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::db::{AppState, queries};
use crate::models::{GatewayProvider, PaymentMethod, PaymentStatus, ProviderUpdate};
use crate::payments::NowPaymentsIpn;
use crate::payments::load_gateway;
use crate::payments::status::{is_amount_sufficient, nowpayments_status};

use super::acknowledge;

pub async fn handle_nowpayments_ipn(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let signature = match headers.get("x-nowpayments-sig") {
        Some(sig) => match sig.to_str() {
            Ok(s) => s.to_string(),
            Err(_) => return (StatusCode::BAD_REQUEST, "Invalid signature header"),
        },
        None => return (StatusCode::BAD_REQUEST, "Missing x-nowpayments-sig header"),
    };

    let ipn: NowPaymentsIpn = match serde_json::from_slice(&body) {
        Ok(i) => i,
        Err(e) => {
            tracing::error!("Failed to parse NowPayments IPN: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let gateway = match load_gateway(&conn, &state.master_key, GatewayProvider::NowPayments) {
        Ok(Some(g)) => g,
        Ok(None) => return (StatusCode::OK, "Gateway disabled"),
        Err(e) => {
            tracing::error!("Failed to load NowPayments gateway: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Gateway error");
        }
    };

    let client = match gateway.nowpayments(&state) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("NowPayments gateway misconfigured: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Gateway error");
        }
    };
    match client.verify_ipn_signature(&body, &signature) {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("NowPayments IPN with bad signature for {}", ipn.payment_id);
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
        Err(e) => {
            tracing::error!("Signature verification error: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid payload");
        }
    }

    let Some(mut status) = nowpayments_status(&ipn.payment_status) else {
        tracing::info!("Ignoring NowPayments status {}", ipn.payment_status);
        return (StatusCode::OK, "Status ignored");
    };

    let by_ref = queries::get_payment_by_provider_ref(&conn, PaymentMethod::Monero, &ipn.payment_id);
    let found = match by_ref {
        Ok(None) => match &ipn.pay_address {
            Some(address) => queries::get_payment_by_address(&conn, address)
                .map(|p| p.filter(|p| p.method == PaymentMethod::Monero)),
            None => Ok(None),
        },
        other => other,
    };
    let payment = match found {
        Ok(Some(p)) => p,
        Ok(None) => {
            tracing::info!("NowPayments IPN for unknown payment {}", ipn.payment_id);
            return (StatusCode::OK, "Unknown payment");
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let received = ipn.actually_paid_atomic();

    // A finished invoice must still cover what we asked for
    if status == PaymentStatus::Completed
        && let (Some(expected), Some(received)) = (payment.expected_atomic, received)
        && !is_amount_sufficient(
            expected,
            received,
            gateway.gateway.settings.underpayment_tolerance_bps,
        )
    {
        tracing::warn!(
            "NowPayments {} finished with {} of {} piconero",
            ipn.payment_id,
            received,
            expected
        );
        status = PaymentStatus::Underpaid;
    }

    tracing::info!(
        "NowPayments: payment {} is {} -> {}",
        ipn.payment_id,
        ipn.payment_status,
        status.as_ref()
    );

    acknowledge(
        &mut conn,
        &ProviderUpdate {
            payment_id: payment.id,
            status,
            received_atomic: received,
            confirmations: None,
            txid: None,
            event: Some((GatewayProvider::NowPayments, ipn.event_id())),
        },
    )
}
