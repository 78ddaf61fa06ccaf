use axum::extract::State;
use serde::Serialize;

use crate::db::AppState;
use crate::extractors::Json;
use crate::payments::RateQuote;

#[derive(Debug, Serialize)]
pub struct RatesResponse {
    pub rates: Vec<RateQuote>,
}

/// Current BTC and XMR prices in USD. Fallback values are shown as such.
pub async fn get_rates(State(state): State<AppState>) -> Json<RatesResponse> {
    Json(RatesResponse {
        rates: state.rates.quote_all().await,
    })
}
