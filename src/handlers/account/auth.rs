use axum::{Extension, extract::State, http::StatusCode};
use serde::{Deserialize, Serialize};

use crate::crypto::{hash_password, verify_password};
use crate::db::{AppState, queries};
use crate::error::{AppError, Result};
use crate::extractors::Json;
use crate::middleware::CurrentUser;
use crate::models::{CreateUser, User, UserRole};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub token: String,
    pub user: User,
}

/// bcrypt is deliberately slow; keep it off the async workers.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| AppError::Internal(format!("Blocking task failed: {}", e)))
}

pub async fn register(
    State(state): State<AppState>,
    Json(input): Json<CreateUser>,
) -> Result<(StatusCode, Json<AuthResponse>)> {
    let email = input.email.trim().to_lowercase();
    let name = input.name.trim().to_string();

    if !email.contains('@') || email.len() > 254 {
        return Err(AppError::BadRequest("A valid email is required".into()));
    }
    if name.is_empty() {
        return Err(AppError::BadRequest("Name is required".into()));
    }
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(AppError::BadRequest(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }

    let role = match &state.bootstrap_admin_email {
        Some(admin) if admin.trim().eq_ignore_ascii_case(&email) => UserRole::Admin,
        _ => UserRole::Customer,
    };

    let password = input.password;
    let password_hash = blocking(move || hash_password(&password)).await??;

    let conn = state.db.get()?;
    let user = queries::create_user(&conn, &email, &name, &password_hash, role)?;
    let token = state.sessions.issue(&user.id, user.role)?;

    tracing::info!("Registered account {} ({})", user.id, user.role.as_ref());
    Ok((StatusCode::CREATED, Json(AuthResponse { token, user })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(input): Json<LoginRequest>,
) -> Result<Json<AuthResponse>> {
    let invalid = || AppError::Unauthorized("Invalid email or password".into());

    let user = {
        let conn = state.db.get()?;
        queries::get_user_by_email(&conn, &input.email)?
    };
    let Some(user) = user else {
        return Err(invalid());
    };

    let hash = user.password_hash.clone();
    let password = input.password;
    if !blocking(move || verify_password(&password, &hash)).await? {
        return Err(invalid());
    }

    let token = state.sessions.issue(&user.id, user.role)?;
    Ok(Json(AuthResponse { token, user }))
}

pub async fn me(Extension(CurrentUser(user)): Extension<CurrentUser>) -> Json<User> {
    Json(user)
}
