//! HS256 session tokens for storefront accounts.

use jwt_simple::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::UserRole;

/// Custom claims carried in a session token. The user id is the `sub` claim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    pub role: UserRole,
}

/// A verified session token.
#[derive(Debug, Clone)]
pub struct Session {
    pub user_id: String,
    pub role: UserRole,
}

#[derive(Clone)]
pub struct SessionKeys {
    key: HS256Key,
    ttl_hours: u64,
}

impl SessionKeys {
    pub fn new(secret: &[u8], ttl_hours: u64) -> Self {
        Self {
            key: HS256Key::from_bytes(secret),
            ttl_hours,
        }
    }

    pub fn issue(&self, user_id: &str, role: UserRole) -> Result<String> {
        let claims = Claims::with_custom_claims(
            SessionClaims { role },
            Duration::from_hours(self.ttl_hours),
        )
        .with_subject(user_id);

        self.key
            .authenticate(claims)
            .map_err(|e| AppError::Internal(format!("Failed to sign session token: {}", e)))
    }

    /// Verify signature and expiry. Any failure is reported as 401.
    pub fn verify(&self, token: &str) -> Result<Session> {
        let claims = self
            .key
            .verify_token::<SessionClaims>(token, None)
            .map_err(|_| AppError::Unauthorized("Invalid or expired token".into()))?;

        let user_id = claims
            .subject
            .ok_or_else(|| AppError::Unauthorized("Token has no subject".into()))?;

        Ok(Session {
            user_id,
            role: claims.custom.role,
        })
    }
}
