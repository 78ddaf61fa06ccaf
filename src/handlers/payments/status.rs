use axum::{Extension, extract::State};
use serde::Serialize;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::CurrentUser;
use crate::models::{OrderStatus, PaymentDetails, PaymentMethod, PaymentResponse, PaymentStatus};
use crate::payments::processing;

use super::payment_response;

#[derive(Debug, Serialize)]
pub struct PaymentStatusResponse {
    pub order_id: String,
    pub order_status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_method: PaymentMethod,
    pub payment_details: Option<PaymentDetails>,
    pub payment: Option<PaymentResponse>,
}

/// Poll an order's payment state. A pending payment whose window closed is
/// expired on the spot rather than waiting for the sweeper.
pub async fn get_payment_status(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(order_id): Path<String>,
) -> Result<Json<PaymentStatusResponse>> {
    let mut conn = state.db.get()?;
    queries::get_order_for_user(&conn, &order_id, &user.id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    let payment = match queries::latest_payment_for_order(&conn, &order_id)? {
        Some(p) => Some(processing::expire_if_due(&mut conn, p, queries::now())?),
        None => None,
    };

    // Reload: expiry may have been mirrored onto the order
    let order = queries::get_order_by_id(&conn, &order_id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;

    Ok(Json(PaymentStatusResponse {
        order_id: order.id,
        order_status: order.status,
        payment_status: order.payment_status,
        payment_method: order.payment_method,
        payment_details: order.payment_details,
        payment: payment.as_ref().map(payment_response),
    }))
}
