use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};

use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::models::User;
use crate::util::extract_bearer_token;

/// The authenticated account, inserted into request extensions.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub User);

/// Authenticate a user from the bearer session token.
fn authenticate_user(state: &AppState, headers: &HeaderMap) -> Result<User> {
    let token = extract_bearer_token(headers)
        .ok_or_else(|| AppError::Unauthorized("Missing bearer token".into()))?;
    let session = state.sessions.verify(token)?;

    let conn = state.db.get()?;
    // A deleted account invalidates its tokens
    let user = queries::get_user_by_id(&conn, &session.user_id)?
        .ok_or_else(|| AppError::Unauthorized("Account no longer exists".into()))?;
    // So does a role change since the token was issued
    if user.role != session.role {
        tracing::info!(
            "Rejecting {} token for {} account {}",
            session.role.as_ref(),
            user.role.as_ref(),
            user.id
        );
        return Err(AppError::Unauthorized("Session is out of date, sign in again".into()));
    }
    Ok(user)
}

pub async fn user_auth(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate_user(&state, request.headers())?;
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}

pub async fn require_admin(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Result<Response> {
    let user = authenticate_user(&state, request.headers())?;
    // Role is read from the database, not the token, so demotion is immediate
    if !user.is_admin() {
        return Err(AppError::Forbidden("Admin access required".into()));
    }
    request.extensions_mut().insert(CurrentUser(user));
    Ok(next.run(request).await)
}
