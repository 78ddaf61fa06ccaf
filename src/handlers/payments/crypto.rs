use axum::{Extension, extract::State, http::StatusCode};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::{
    CreatePaymentRequest, CryptoCurrency, Payment, PaymentDetails, PaymentInstructions,
    PaymentMethod, PaymentResponse,
};
use crate::payments::processing::{self, Reservation};
use crate::payments::status::{cents_to_atomic, format_atomic};
use crate::payments::{ActiveGateway, require_gateway};

use super::{abandon, payment_response};

/// Load the gateway and reserve a payment row. The connection is released
/// before any provider call.
fn reserve(
    state: &AppState,
    user_id: &str,
    order_id: &str,
    method: PaymentMethod,
) -> Result<(ActiveGateway, Reservation)> {
    let mut conn = state.db.get()?;
    let gateway = require_gateway(&conn, &state.master_key, method.provider())?;
    let (_, reservation) = processing::reserve_payment(
        &mut conn,
        order_id,
        user_id,
        method,
        &gateway.gateway.settings,
        queries::now(),
    )?;
    Ok((gateway, reservation))
}

fn attach(
    state: &AppState,
    payment: &Payment,
    instructions: &PaymentInstructions,
    details: &PaymentDetails,
) -> Result<Payment> {
    let mut conn = state.db.get()?;
    processing::attach_instructions(&mut conn, payment, instructions, details)
}

pub async fn create_bitcoin_payment(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(input): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>)> {
    let (gateway, reservation) = reserve(&state, &user.id, &input.order_id, PaymentMethod::Bitcoin)?;
    let payment = match reservation {
        Reservation::Existing(payment) => return Ok((StatusCode::OK, Json(payment_response(&payment)))),
        Reservation::Reserved(payment) => payment,
    };

    match setup_bitcoin(&state, &gateway, &payment).await {
        Ok(ready) => {
            tracing::info!(
                "Bitcoin payment {} for order {}: {} at {}",
                ready.id,
                ready.order_id,
                ready.expected_atomic.unwrap_or_default(),
                ready.address.as_deref().unwrap_or_default()
            );
            Ok((StatusCode::CREATED, Json(payment_response(&ready))))
        }
        Err(e) => {
            abandon(&state, &payment);
            Err(e)
        }
    }
}

async fn setup_bitcoin(state: &AppState, gateway: &ActiveGateway, payment: &Payment) -> Result<Payment> {
    let quote = state.rates.quote(CryptoCurrency::Btc).await;
    if quote.is_fallback() {
        return Err(AppError::ServiceUnavailable("Exchange rate unavailable".into()));
    }
    let expected = cents_to_atomic(payment.amount_cents, quote.usd, CryptoCurrency::Btc)
        .ok_or_else(|| AppError::Internal(format!("Cannot price {} cents in BTC", payment.amount_cents)))?;

    let address = gateway.blockonomics(state)?.new_address().await?;
    let expires_at = payment
        .expires_at
        .ok_or_else(|| AppError::Internal("Reserved payment has no expiry".into()))?;

    let instructions = PaymentInstructions {
        crypto_currency: Some(CryptoCurrency::Btc),
        expected_atomic: Some(expected),
        exchange_rate: Some(quote.usd),
        address: Some(address.clone()),
        provider_ref: None,
        expires_at: None,
    };
    let details = PaymentDetails::Bitcoin {
        address,
        amount: format_atomic(expected, CryptoCurrency::Btc),
        exchange_rate: quote.usd,
        expires_at,
    };
    attach(state, payment, &instructions, &details)
}

pub async fn create_monero_payment(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(input): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PaymentResponse>)> {
    let (gateway, reservation) = reserve(&state, &user.id, &input.order_id, PaymentMethod::Monero)?;
    let payment = match reservation {
        Reservation::Existing(payment) => return Ok((StatusCode::OK, Json(payment_response(&payment)))),
        Reservation::Reserved(payment) => payment,
    };

    match setup_monero(&state, &gateway, &payment).await {
        Ok(ready) => {
            tracing::info!(
                "Monero payment {} for order {} via NowPayments {}",
                ready.id,
                ready.order_id,
                ready.provider_ref.as_deref().unwrap_or_default()
            );
            Ok((StatusCode::CREATED, Json(payment_response(&ready))))
        }
        Err(e) => {
            abandon(&state, &payment);
            Err(e)
        }
    }
}

async fn setup_monero(state: &AppState, gateway: &ActiveGateway, payment: &Payment) -> Result<Payment> {
    let ipn_url = format!("{}/api/payments/webhook/nowpayments", state.base_url);
    let invoice = gateway
        .nowpayments(state)?
        .create_payment(&payment.order_id, payment.amount_cents, &ipn_url)
        .await?;
    let expires_at = payment
        .expires_at
        .ok_or_else(|| AppError::Internal("Reserved payment has no expiry".into()))?;

    // NowPayments prices the invoice; record the rate it implies
    let coins = invoice.pay_amount_atomic as f64 / CryptoCurrency::Xmr.atomic_per_coin() as f64;
    let implied_rate = (payment.amount_cents as f64 / 100.0) / coins;

    let instructions = PaymentInstructions {
        crypto_currency: Some(CryptoCurrency::Xmr),
        expected_atomic: Some(invoice.pay_amount_atomic),
        exchange_rate: Some(implied_rate),
        address: Some(invoice.pay_address.clone()),
        provider_ref: Some(invoice.payment_id.clone()),
        expires_at: None,
    };
    let details = PaymentDetails::Monero {
        address: invoice.pay_address,
        amount: format_atomic(invoice.pay_amount_atomic, CryptoCurrency::Xmr),
        nowpayments_payment_id: invoice.payment_id,
        expires_at,
    };
    attach(state, payment, &instructions, &details)
}
