use axum::{Extension, extract::State};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::{Json, Path};
use crate::middleware::CurrentUser;
use crate::models::{GatewayProvider, GatewayView, PaymentGateway, UpdateGateway};
use crate::payments::{decrypt_credentials, encrypt_credentials};

fn view(state: &AppState, gateway: PaymentGateway) -> Result<GatewayView> {
    let credentials = decrypt_credentials(&state.master_key, &gateway)?;
    Ok(GatewayView {
        credentials: credentials.as_ref().map(Into::into),
        gateway,
    })
}

pub async fn list_gateways(State(state): State<AppState>) -> Result<Json<Vec<GatewayView>>> {
    let conn = state.db.get()?;
    for provider in GatewayProvider::ALL {
        queries::ensure_gateway(&conn, provider)?;
    }
    let views = queries::list_gateways(&conn)?
        .into_iter()
        .map(|g| view(&state, g))
        .collect::<Result<Vec<_>>>()?;
    Ok(Json(views))
}

fn validate(input: &UpdateGateway, provider: GatewayProvider) -> Result<()> {
    if let Some(c) = input.required_confirmations
        && !(0..=provider.max_confirmations()).contains(&c)
    {
        return Err(AppError::BadRequest(format!(
            "required_confirmations for {} must be between 0 and {}",
            provider.as_ref(),
            provider.max_confirmations()
        )));
    }
    if let Some(m) = input.payment_window_minutes
        && !(5..=7 * 24 * 60).contains(&m)
    {
        return Err(AppError::BadRequest(
            "payment_window_minutes must be between 5 and 10080".into(),
        ));
    }
    if let Some(bps) = input.underpayment_tolerance_bps
        && !(0..=1_000).contains(&bps)
    {
        return Err(AppError::BadRequest(
            "underpayment_tolerance_bps must be between 0 and 1000".into(),
        ));
    }
    if let Some(creds) = &input.credentials
        && creds.provider() != provider
    {
        return Err(AppError::BadRequest(format!(
            "Credentials are for {}, not {}",
            creds.provider().as_ref(),
            provider.as_ref()
        )));
    }
    Ok(())
}

pub async fn update_gateway(
    State(state): State<AppState>,
    Extension(CurrentUser(admin)): Extension<CurrentUser>,
    Path(provider): Path<GatewayProvider>,
    Json(input): Json<UpdateGateway>,
) -> Result<Json<GatewayView>> {
    validate(&input, provider)?;

    let encrypted = input
        .credentials
        .as_ref()
        .map(|c| encrypt_credentials(&state.master_key, c))
        .transpose()?;

    let conn = state.db.get()?;
    let current = {
        queries::ensure_gateway(&conn, provider)?;
        queries::get_gateway(&conn, provider)?
            .ok_or_else(|| AppError::Internal(format!("Gateway {} missing", provider.as_ref())))?
    };
    if input.enabled == Some(true) && encrypted.is_none() && current.credentials_encrypted.is_none() {
        return Err(AppError::BadRequest(
            "Cannot enable a gateway without credentials".into(),
        ));
    }

    queries::update_gateway(&conn, provider, &input, encrypted)?;
    tracing::info!(
        "Gateway {} updated by {} (enabled: {:?}, credentials replaced: {})",
        provider.as_ref(),
        admin.id,
        input.enabled,
        input.credentials.is_some()
    );

    let gateway = queries::get_gateway(&conn, provider)?
        .ok_or_else(|| AppError::Internal(format!("Gateway {} missing", provider.as_ref())))?;
    Ok(Json(view(&state, gateway)?))
}
