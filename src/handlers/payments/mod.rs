mod crypto;
mod paypal;
mod status;

pub use crypto::*;
pub use paypal::*;
pub use status::*;

use axum::{
    Router, middleware,
    routing::{get, post},
};

use crate::db::AppState;
use crate::error::AppError;
use crate::middleware::{rate_limit, user_auth};
use crate::models::{Payment, PaymentResponse};
use crate::payments::blockonomics::payment_uri;
use crate::payments::processing;
use crate::payments::status::format_atomic;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/payments/bitcoin", post(create_bitcoin_payment))
        .route("/payments/monero", post(create_monero_payment))
        .route("/payments/paypal/create", post(create_paypal_payment))
        .route("/payments/paypal/capture", post(capture_paypal_payment))
        .route("/payments/{order_id}/status", get(get_payment_status))
        .layer(middleware::from_fn_with_state(state.clone(), user_auth))
        .layer(middleware::from_fn_with_state(state, rate_limit))
}

/// Customer-facing view of a payment attempt.
pub fn payment_response(payment: &Payment) -> PaymentResponse {
    let crypto_amount = match (payment.expected_atomic, payment.crypto_currency) {
        (Some(atomic), Some(coin)) => Some(format_atomic(atomic, coin)),
        _ => None,
    };
    let uri = match (&payment.address, &crypto_amount, payment.method) {
        (Some(address), Some(amount), crate::models::PaymentMethod::Bitcoin) => {
            Some(payment_uri(address, amount))
        }
        _ => None,
    };

    PaymentResponse {
        payment_id: payment.id.clone(),
        order_id: payment.order_id.clone(),
        method: payment.method,
        status: payment.status,
        amount_cents: payment.amount_cents,
        crypto_currency: payment.crypto_currency,
        crypto_amount,
        address: payment.address.clone(),
        payment_uri: uri,
        exchange_rate: payment.exchange_rate,
        expires_at: payment.expires_at,
    }
}

/// Mark a reservation failed after its provider setup went wrong.
/// Errors are logged; the caller is already returning the setup error.
fn abandon(state: &AppState, payment: &Payment) {
    let result = state
        .db
        .get()
        .map_err(AppError::from)
        .and_then(|mut conn| processing::abandon_reservation(&mut conn, payment));
    if let Err(e) = result {
        tracing::error!("Failed to abandon payment {}: {}", payment.id, e);
    }
}
