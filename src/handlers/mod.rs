pub mod account;
pub mod admin;
pub mod payments;
pub mod public;
pub mod webhooks;

use axum::{
    Router,
    http::{HeaderValue, Method, header},
    routing::get,
};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};

use crate::db::AppState;

fn cors(frontend_url: &str) -> CorsLayer {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            header::HeaderName::from_static("idempotency-key"),
        ]);
    match HeaderValue::from_str(frontend_url) {
        Ok(origin) => layer.allow_origin(AllowOrigin::exact(origin)),
        Err(_) => {
            tracing::warn!("FRONTEND_URL {} is not a valid origin; CORS disabled", frontend_url);
            layer
        }
    }
}

/// The full HTTP application.
pub fn app(state: AppState) -> Router {
    let api = Router::new()
        .merge(public::router())
        .merge(webhooks::router())
        .merge(account::router(state.clone()))
        .merge(payments::router(state.clone()))
        .merge(admin::router(state.clone()));

    Router::new()
        .route("/health", get(public::health))
        .nest("/api", api)
        .layer(cors(&state.frontend_url))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
