mod blockonomics;
mod nowpayments;
mod paypal;

pub use blockonomics::*;
pub use nowpayments::*;
pub use paypal::*;

use axum::{
    Router,
    http::StatusCode,
    routing::{get, post},
};
use rusqlite::Connection;

use crate::db::AppState;
use crate::error::AppError;
use crate::models::ProviderUpdate;
use crate::payments::processing::{self, UpdateOutcome};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments/webhook/blockonomics", get(handle_blockonomics_callback))
        .route("/payments/webhook/nowpayments", post(handle_nowpayments_ipn))
        .route("/payments/webhook/paypal", post(handle_paypal_webhook))
}

/// Apply a verified provider update and turn the outcome into the webhook reply.
///
/// Anything other than a database failure is acknowledged with 200 so the
/// provider stops retrying.
fn acknowledge(conn: &mut Connection, update: &ProviderUpdate) -> (StatusCode, &'static str) {
    match processing::apply_provider_update(conn, update) {
        Ok(UpdateOutcome::Applied(_)) => (StatusCode::OK, "OK"),
        Ok(UpdateOutcome::Unchanged) => (StatusCode::OK, "No change"),
        Ok(UpdateOutcome::Duplicate) => (StatusCode::OK, "Already processed"),
        Ok(UpdateOutcome::Rejected { .. }) => (StatusCode::OK, "Transition ignored"),
        Err(AppError::NotFound(_)) => (StatusCode::OK, "Payment not found"),
        Err(e) => {
            tracing::error!("Failed to apply update to payment {}: {}", update.payment_id, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Database error")
        }
    }
}
