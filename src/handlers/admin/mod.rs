mod gateways;
mod orders;
mod reports;

pub use gateways::*;
pub use orders::*;
pub use reports::*;

use axum::{
    Router, middleware,
    routing::{get, put},
};

use crate::db::AppState;
use crate::middleware::require_admin;

pub fn router(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/admin/orders", get(list_orders))
        .route("/admin/orders/{id}", get(get_order))
        .route("/admin/gateways", get(list_gateways))
        .route("/admin/gateways/{provider}", put(update_gateway))
        .route("/admin/reports/summary", get(get_summary))
        .layer(middleware::from_fn_with_state(state, require_admin))
}
