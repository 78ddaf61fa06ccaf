use axum::{
    Extension,
    extract::State,
    http::{HeaderMap, StatusCode},
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::CurrentUser;
use crate::models::{CheckoutRequest, CreateOrder, Order, OrderWithItems};
use crate::util::extract_idempotency_key;

/// Turn the cart into an order.
///
/// A repeated `Idempotency-Key` returns the order created by the first
/// request with 200 instead of 201.
pub async fn checkout(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    headers: HeaderMap,
    Json(input): Json<CheckoutRequest>,
) -> Result<(StatusCode, Json<OrderWithItems>)> {
    if let Some(field) = input.shipping_address.missing_field() {
        return Err(AppError::BadRequest(format!(
            "Shipping address is missing {}",
            field
        )));
    }

    let email = match input.email.as_deref().map(str::trim) {
        Some(e) if !e.is_empty() => {
            if !e.contains('@') {
                return Err(AppError::BadRequest("Invalid contact email".into()));
            }
            e.to_string()
        }
        _ => user.email.clone(),
    };

    let mut conn = state.db.get()?;
    let outcome = queries::create_order_from_cart(
        &mut conn,
        &CreateOrder {
            user_id: user.id.clone(),
            email,
            payment_method: input.payment_method,
            shipping_address: input.shipping_address,
            idempotency_key: extract_idempotency_key(&headers),
        },
    )?;

    if outcome.created {
        tracing::info!(
            "Order {} created for {} ({} cents)",
            outcome.order.order.id,
            user.id,
            outcome.order.order.total_cents
        );
        Ok((StatusCode::CREATED, Json(outcome.order)))
    } else {
        Ok((StatusCode::OK, Json(outcome.order)))
    }
}

pub async fn list_orders(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Vec<Order>>> {
    let conn = state.db.get()?;
    Ok(Json(queries::list_orders_for_user(&conn, &user.id)?))
}

pub async fn get_order(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>> {
    let conn = state.db.get()?;
    let order = queries::get_order_for_user(&conn, &id, &user.id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
    Ok(Json(queries::load_order_details(&conn, order)?))
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>> {
    let mut conn = state.db.get()?;
    if queries::get_order_for_user(&conn, &id, &user.id)?.is_none() {
        return Err(AppError::NotFound("Order not found".into()));
    }

    if !queries::cancel_order(&mut conn, &id)? {
        return Err(AppError::Conflict("Only pending orders can be cancelled".into()));
    }
    tracing::info!("Order {} cancelled by {}", id, user.id);

    let order = queries::get_order_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
    Ok(Json(queries::load_order_details(&conn, order)?))
}
