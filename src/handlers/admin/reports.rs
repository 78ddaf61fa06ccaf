use axum::extract::State;

use crate::db::{AppState, queries};
use crate::error::Result;
use crate::extractors::Json;

pub async fn get_summary(State(state): State<AppState>) -> Result<Json<queries::SalesSummary>> {
    let conn = state.db.get()?;
    Ok(Json(queries::sales_summary(&conn)?))
}
