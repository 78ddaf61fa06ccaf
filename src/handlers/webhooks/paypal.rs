use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
};
use serde_json::Value;

use crate::db::{AppState, queries};
use crate::models::{GatewayProvider, PaymentMethod, PaymentStatus, ProviderUpdate};
use crate::payments::status::paypal_event_status;
use crate::payments::{PayPalWebhookEvent, load_gateway, processing};

use super::acknowledge;

pub async fn handle_paypal_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, &'static str) {
    let raw: Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::error!("Failed to parse PayPal webhook: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid JSON");
        }
    };
    let event: PayPalWebhookEvent = match serde_json::from_value(raw.clone()) {
        Ok(e) => e,
        Err(e) => {
            tracing::error!("Unexpected PayPal webhook shape: {}", e);
            return (StatusCode::BAD_REQUEST, "Invalid event");
        }
    };

    // Verification calls PayPal, so no connection is held across it
    let gateway = {
        let conn = match state.db.get() {
            Ok(c) => c,
            Err(e) => {
                tracing::error!("DB connection error: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
            }
        };
        match load_gateway(&conn, &state.master_key, GatewayProvider::PayPal) {
            Ok(Some(g)) => g,
            Ok(None) => return (StatusCode::OK, "Gateway disabled"),
            Err(e) => {
                tracing::error!("Failed to load PayPal gateway: {}", e);
                return (StatusCode::INTERNAL_SERVER_ERROR, "Gateway error");
            }
        }
    };

    let client = match gateway.paypal(&state) {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("PayPal gateway misconfigured: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Gateway error");
        }
    };
    match client.verify_webhook(&headers, &raw).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("PayPal webhook {} failed verification", event.id);
            return (StatusCode::UNAUTHORIZED, "Invalid signature");
        }
        Err(e) => {
            tracing::error!("PayPal webhook verification error: {}", e);
            return (StatusCode::SERVICE_UNAVAILABLE, "Verification unavailable");
        }
    }

    let Some(mut status) = paypal_event_status(&event.event_type) else {
        return (StatusCode::OK, "Event ignored");
    };
    let Some(paypal_order_id) = event.paypal_order_id() else {
        tracing::warn!("PayPal {} event {} has no order id", event.event_type, event.id);
        return (StatusCode::OK, "No order reference");
    };

    let mut conn = match state.db.get() {
        Ok(c) => c,
        Err(e) => {
            tracing::error!("DB connection error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let payment = match queries::get_payment_by_provider_ref(&conn, PaymentMethod::PayPal, paypal_order_id) {
        Ok(Some(p)) => p,
        Ok(None) => {
            tracing::info!("PayPal webhook for unknown order {}", paypal_order_id);
            return (StatusCode::OK, "Unknown payment");
        }
        Err(e) => {
            tracing::error!("DB error: {}", e);
            return (StatusCode::INTERNAL_SERVER_ERROR, "Database error");
        }
    };

    let captured = event.amount_cents();
    if event.is_refund()
        && let Some(refunded) = captured
        && refunded < payment.amount_cents
    {
        // Partial refunds leave the order paid
        tracing::warn!(
            "PayPal partial refund of {} cents on payment {} ({} cents)",
            refunded,
            payment.id,
            payment.amount_cents
        );
        return (StatusCode::OK, "Partial refund");
    }
    if status == PaymentStatus::Completed && captured.is_none_or(|c| c < payment.amount_cents) {
        tracing::warn!(
            "PayPal capture for payment {} is {:?} cents, expected {}",
            payment.id,
            captured,
            payment.amount_cents
        );
        status = PaymentStatus::Underpaid;
    }

    tracing::info!(
        "PayPal: {} for order {} -> {}",
        event.event_type,
        paypal_order_id,
        status.as_ref()
    );

    let capture_id = event.capture_id().map(String::from);
    let reply = acknowledge(
        &mut conn,
        &ProviderUpdate {
            payment_id: payment.id.clone(),
            status,
            received_atomic: captured.filter(|_| capture_id.is_some()),
            confirmations: None,
            txid: capture_id.clone(),
            event: Some((GatewayProvider::PayPal, event.id.clone())),
        },
    );

    if reply.0 == StatusCode::OK
        && let Some(capture_id) = &capture_id
        && let Err(e) = processing::record_paypal_capture(&conn, &payment.order_id, capture_id)
    {
        tracing::error!("Failed to record PayPal capture {}: {}", capture_id, e);
    }
    reply
}
