mod auth;
mod cart;
mod orders;

pub use auth::*;
pub use cart::*;
pub use orders::*;

use axum::{
    Router, middleware,
    routing::{delete, get, post, put},
};

use crate::db::AppState;
use crate::middleware::{rate_limit, user_auth};

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        // Credential endpoints are rate limited per client
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .layer(middleware::from_fn_with_state(state.clone(), rate_limit))
        .merge(
            Router::new()
                .route("/auth/me", get(me))
                // Cart
                .route("/cart", get(get_cart))
                .route("/cart", delete(clear_cart))
                .route("/cart/items", post(add_cart_item))
                .route("/cart/items/{product_id}", put(update_cart_item))
                .route("/cart/items/{product_id}", delete(remove_cart_item))
                // Orders
                .route("/orders", post(checkout))
                .route("/orders", get(list_orders))
                .route("/orders/{id}", get(get_order))
                .route("/orders/{id}/cancel", post(cancel_order))
                .layer(middleware::from_fn_with_state(state, user_auth)),
        )
}
