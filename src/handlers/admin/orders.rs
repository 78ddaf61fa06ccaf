use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path, Query};
use crate::models::{AdminOrderQuery, Order, OrderWithItems, Paginated};

const MAX_PAGE: i64 = 200;

pub async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<AdminOrderQuery>,
) -> Result<Json<Paginated<Order>>> {
    let limit = query.limit.clamp(1, MAX_PAGE);
    let offset = query.offset.max(0);

    let conn = state.db.get()?;
    let (items, total) = queries::list_orders_paginated(&conn, query.payment_status, limit, offset)?;
    Ok(Json(Paginated {
        items,
        total,
        limit,
        offset,
    }))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderWithItems>> {
    let conn = state.db.get()?;
    let order = queries::get_order_by_id(&conn, &id)?
        .ok_or_else(|| AppError::NotFound("Order not found".into()))?;
    Ok(Json(queries::load_order_details(&conn, order)?))
}
