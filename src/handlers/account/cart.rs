use axum::{Extension, extract::State};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::CurrentUser;
use crate::models::{AddCartItem, Cart, UpdateCartItem};

const MAX_LINE_QUANTITY: i64 = 100;

pub async fn get_cart(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Cart>> {
    let conn = state.db.get()?;
    Ok(Json(queries::get_cart(&conn, &user.id)?))
}

pub async fn add_cart_item(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Json(input): Json<AddCartItem>,
) -> Result<Json<Cart>> {
    if input.quantity < 1 || input.quantity > MAX_LINE_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "Quantity must be between 1 and {}",
            MAX_LINE_QUANTITY
        )));
    }

    let conn = state.db.get()?;
    let product = queries::get_product_by_id(&conn, &input.product_id)?
        .filter(|p| p.active)
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;

    let in_cart = queries::get_cart_quantity(&conn, &user.id, &product.id)?.unwrap_or(0);
    let wanted = in_cart + input.quantity;
    if wanted > product.stock {
        return Err(AppError::Conflict(format!(
            "Only {} of {} in stock",
            product.stock, product.name
        )));
    }
    if wanted > MAX_LINE_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "At most {} of one product per order",
            MAX_LINE_QUANTITY
        )));
    }

    queries::add_cart_item(&conn, &user.id, &product.id, input.quantity)?;
    Ok(Json(queries::get_cart(&conn, &user.id)?))
}

/// Set a line's quantity; zero removes it.
pub async fn update_cart_item(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(product_id): Path<String>,
    Json(input): Json<UpdateCartItem>,
) -> Result<Json<Cart>> {
    if input.quantity < 0 || input.quantity > MAX_LINE_QUANTITY {
        return Err(AppError::BadRequest(format!(
            "Quantity must be between 0 and {}",
            MAX_LINE_QUANTITY
        )));
    }

    let conn = state.db.get()?;
    if input.quantity == 0 {
        queries::remove_cart_item(&conn, &user.id, &product_id)?;
        return Ok(Json(queries::get_cart(&conn, &user.id)?));
    }

    let product = queries::get_product_by_id(&conn, &product_id)?
        .ok_or_else(|| AppError::NotFound("Product not found".into()))?;
    if input.quantity > product.stock {
        return Err(AppError::Conflict(format!(
            "Only {} of {} in stock",
            product.stock, product.name
        )));
    }

    if !queries::set_cart_item_quantity(&conn, &user.id, &product_id, input.quantity)? {
        return Err(AppError::NotFound("Item not in cart".into()));
    }
    Ok(Json(queries::get_cart(&conn, &user.id)?))
}

pub async fn remove_cart_item(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
    Path(product_id): Path<String>,
) -> Result<Json<Cart>> {
    let conn = state.db.get()?;
    if !queries::remove_cart_item(&conn, &user.id, &product_id)? {
        return Err(AppError::NotFound("Item not in cart".into()));
    }
    Ok(Json(queries::get_cart(&conn, &user.id)?))
}

pub async fn clear_cart(
    State(state): State<AppState>,
    Extension(CurrentUser(user)): Extension<CurrentUser>,
) -> Result<Json<Cart>> {
    let conn = state.db.get()?;
    queries::clear_cart(&conn, &user.id)?;
    Ok(Json(queries::get_cart(&conn, &user.id)?))
}
