//! Bearer-token validation and principal extractors.
//!
//! The service only *validates* tokens; minting account credentials is the
//! job of the out-of-scope auth collaborator. `issue_token` exists for
//! operational tooling and the test suites.

use crate::error::HttpAppError;
use crate::state::AppState;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use chrono::{Duration, Utc};
use courier_core::AppError;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// JWT claims structure
#[derive(Debug, Serialize, Deserialize)]
pub struct JwtClaims {
    pub sub: Uuid, // account id
    pub exp: i64,  // expiration timestamp
    pub iat: i64,  // issued at timestamp
}

/// Authenticated account extracted from a bearer token.
#[derive(Debug, Clone, Copy)]
pub struct Principal {
    pub account_id: Uuid,
}

/// `Principal` that may be absent. Endpoints open to anonymous senders use
/// this so a presented-but-invalid token still fails loudly instead of
/// silently downgrading to anonymous.
#[derive(Debug, Clone, Copy)]
pub struct OptionalPrincipal(pub Option<Principal>);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
}

fn decode_principal(token: &str, secret: &str) -> Result<Principal, AppError> {
    let data = decode::<JwtClaims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|e| AppError::Unauthorized(format!("Invalid authentication token: {}", e)))?;

    Ok(Principal {
        account_id: data.claims.sub,
    })
}

impl FromRequestParts<Arc<AppState>> for Principal {
    type Rejection = HttpAppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or_else(|| {
            HttpAppError(AppError::Unauthorized(
                "Missing authorization header".to_string(),
            ))
        })?;
        decode_principal(token, state.config.jwt_secret()).map_err(HttpAppError::from)
    }
}

impl FromRequestParts<Arc<AppState>> for OptionalPrincipal {
    type Rejection = HttpAppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            None => Ok(OptionalPrincipal(None)),
            Some(token) => decode_principal(token, state.config.jwt_secret())
                .map(|p| OptionalPrincipal(Some(p)))
                .map_err(HttpAppError::from),
        }
    }
}

/// Sign a bearer token for the given account.
pub fn issue_token(
    secret: &str,
    account_id: Uuid,
    expires_in_hours: i64,
) -> Result<String, AppError> {
    let now = Utc::now();
    let claims = JwtClaims {
        sub: account_id,
        exp: (now + Duration::hours(expires_in_hours)).timestamp(),
        iat: now.timestamp(),
    };
    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(format!("Failed to sign token: {}", e)))
}
