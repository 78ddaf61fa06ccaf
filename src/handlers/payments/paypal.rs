use axum::{Extension, extract::State, http::StatusCode};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::{
    CreatePaymentRequest, GatewayProvider, Payment, PaymentDetails, PaymentInstructions,
    PaymentMethod, PaymentStatus, ProviderUpdate,
};
use crate::payments::processing::{self, Reservation, UpdateOutcome};
use crate::payments::status::paypal_capture_status;
use crate::payments::{ActiveGateway, require_gateway};

use super::abandon;

#[derive(Debug, Serialize)]
pub struct PayPalCreateResponse {
    pub payment_id: String,
    pub order_id: String,
    pub paypal_order_id: Option<String>,
    pub approve_url: Option<String>,
    pub status: PaymentStatus,
}

#[derive(Debug, Serialize)]
pub struct PayPalCaptureResponse {
    pub payment_id: String,
    pub order_id: String,
    pub status: PaymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capture_id: Option<String>,
}

pub async fn create_paypal_payment(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(input): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<PayPalCreateResponse>)> {
    let (gateway, order, reservation) = {
        let mut conn = state.db.get()?;
        let gateway = require_gateway(&conn, &state.master_key, GatewayProvider::PayPal)?;
        let (order, reservation) = processing::reserve_payment(
            &mut conn,
            &input.order_id,
            &user.id,
            PaymentMethod::PayPal,
            &gateway.gateway.settings,
            queries::now(),
        )?;
        (gateway, order, reservation)
    };

    let payment = match reservation {
        Reservation::Existing(payment) => {
            let approve_url = match order.payment_details {
                Some(PaymentDetails::PayPal { approve_url, .. }) => approve_url,
                _ => None,
            };
            return Ok((
                StatusCode::OK,
                Json(PayPalCreateResponse {
                    payment_id: payment.id,
                    order_id: payment.order_id,
                    paypal_order_id: payment.provider_ref,
                    approve_url,
                    status: payment.status,
                }),
            ));
        }
        Reservation::Reserved(payment) => payment,
    };

    match setup_paypal(&state, &gateway, &payment).await {
        Ok((ready, approve_url)) => {
            tracing::info!(
                "PayPal payment {} for order {}: {}",
                ready.id,
                ready.order_id,
                ready.provider_ref.as_deref().unwrap_or_default()
            );
            Ok((
                StatusCode::CREATED,
                Json(PayPalCreateResponse {
                    payment_id: ready.id,
                    order_id: ready.order_id,
                    paypal_order_id: ready.provider_ref,
                    approve_url,
                    status: ready.status,
                }),
            ))
        }
        Err(e) => {
            abandon(&state, &payment);
            Err(e)
        }
    }
}

async fn setup_paypal(
    state: &AppState,
    gateway: &ActiveGateway,
    payment: &Payment,
) -> Result<(Payment, Option<String>)> {
    let return_url = format!(
        "{}/checkout/paypal/return?order_id={}",
        state.frontend_url,
        urlencoding::encode(&payment.order_id)
    );
    let cancel_url = format!(
        "{}/checkout/paypal/cancel?order_id={}",
        state.frontend_url,
        urlencoding::encode(&payment.order_id)
    );

    let paypal_order = gateway
        .paypal(state)?
        .create_order(
            &payment.order_id,
            payment.amount_cents,
            &payment.currency,
            &return_url,
            &cancel_url,
            &payment.id,
        )
        .await?;

    let instructions = PaymentInstructions {
        crypto_currency: None,
        expected_atomic: None,
        exchange_rate: None,
        address: None,
        provider_ref: Some(paypal_order.id.clone()),
        expires_at: None,
    };
    let details = PaymentDetails::PayPal {
        paypal_order_id: paypal_order.id,
        approve_url: paypal_order.approve_url.clone(),
        capture_id: None,
    };

    let mut conn = state.db.get()?;
    let ready = processing::attach_instructions(&mut conn, payment, &instructions, &details)?;
    Ok((ready, paypal_order.approve_url))
}

/// Capture an approved PayPal order after the buyer returns to the store.
pub async fn capture_paypal_payment(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(input): Json<CreatePaymentRequest>,
) -> Result<Json<PayPalCaptureResponse>> {
    let (gateway, payment) = {
        let conn = state.db.get()?;
        let gateway = require_gateway(&conn, &state.master_key, GatewayProvider::PayPal)?;
        queries::get_order_for_user(&conn, &input.order_id, &user.id)?
            .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
        let payment = queries::list_payments_for_order(&conn, &input.order_id)?
            .into_iter()
            .find(|p| p.method == PaymentMethod::PayPal && p.provider_ref.is_some())
            .ok_or_else(|| AppError::NotFound("No PayPal payment for this order".into()))?;
        (gateway, payment)
    };

    if payment.status == PaymentStatus::Completed {
        return Ok(Json(PayPalCaptureResponse {
            payment_id: payment.id,
            order_id: payment.order_id,
            status: payment.status,
            capture_id: None,
        }));
    }
    if payment.status.is_terminal() {
        return Err(AppError::Conflict(format!(
            "Payment is {}",
            payment.status.as_ref()
        )));
    }

    let paypal_order_id = payment.provider_ref.clone().unwrap_or_default();
    let capture = gateway
        .paypal(&state)?
        .capture_order(&paypal_order_id, &format!("capture-{}", payment.id))
        .await?;

    let mut status = paypal_capture_status(
        capture.capture_status.as_deref(),
        capture.amount_cents,
        payment.amount_cents,
    );
    if status == PaymentStatus::Completed
        && capture
            .currency
            .as_deref()
            .is_some_and(|c| !c.eq_ignore_ascii_case(&payment.currency))
    {
        tracing::warn!(
            "PayPal captured {:?} for payment {} priced in {}",
            capture.currency,
            payment.id,
            payment.currency
        );
        status = PaymentStatus::Underpaid;
    }

    let mut conn = state.db.get()?;
    let outcome = processing::apply_provider_update(
        &mut conn,
        &ProviderUpdate {
            payment_id: payment.id.clone(),
            status,
            received_atomic: capture.amount_cents,
            confirmations: None,
            txid: capture.capture_id.clone(),
            event: None,
        },
    )?;
    if let Some(capture_id) = &capture.capture_id {
        processing::record_paypal_capture(&conn, &payment.order_id, capture_id)?;
    }

    let current = match outcome {
        UpdateOutcome::Applied(s) => s,
        _ => queries::get_payment_by_id(&conn, &payment.id)?
            .map(|p| p.status)
            .unwrap_or(payment.status),
    };

    Ok(Json(PayPalCaptureResponse {
        payment_id: payment.id,
        order_id: payment.order_id,
        status: current,
        capture_id: capture.capture_id,
    }))
}
