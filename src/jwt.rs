use axum::{
    async_trait,
    extract::{FromRequestParts, State},
    http::{header, request::Parts},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AppError, AppResult};
use crate::validation::AppJson;

const TOKEN_EXPIRY_HOURS: i64 = 1;
const ADMIN_SUBJECT: &str = "admin";

#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize, // expiry timestamp
    pub iat: usize, // issued at
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_in: i64,
}

/// Sign an admin token valid for `TOKEN_EXPIRY_HOURS` from `issued_at`
pub fn issue_token(secret: &str, issued_at: DateTime<Utc>) -> AppResult<String> {
    let exp = issued_at + chrono::Duration::hours(TOKEN_EXPIRY_HOURS);

    let claims = Claims {
        sub: ADMIN_SUBJECT.to_string(),
        exp: exp.timestamp() as usize,
        iat: issued_at.timestamp() as usize,
    };

    encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AppError::Internal(e.to_string()))
}

pub fn verify_token(secret: &str, token: &str) -> AppResult<Claims> {
    let data = decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| AppError::Unauthorized("Invalid or expired admin token".to_string()))?;

    if data.claims.sub != ADMIN_SUBJECT {
        return Err(AppError::Unauthorized(
            "Invalid or expired admin token".to_string(),
        ));
    }

    Ok(data.claims)
}

/// Login endpoint - validates the admin password and returns a JWT
pub async fn login(
    State(state): State<Arc<crate::AppState>>,
    AppJson(req): AppJson<LoginRequest>,
) -> AppResult<impl IntoResponse> {
    if req.password.is_empty() {
        return Err(AppError::BadRequest("Password is required".to_string()));
    }

    if !state.credentials.verify(&req.password).await? {
        tracing::warn!("Admin login rejected");
        return Err(AppError::Unauthorized("Invalid password".to_string()));
    }

    let token = issue_token(&state.jwt_secret, Utc::now())?;

    Ok(Json(LoginResponse {
        token,
        expires_in: TOKEN_EXPIRY_HOURS * 3600,
    }))
}

/// Present in a handler's arguments when the request carries a valid admin token
#[derive(Debug)]
pub struct AdminSession {
    pub claims: Claims,
}

#[async_trait]
impl FromRequestParts<Arc<crate::AppState>> for AdminSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<crate::AppState>,
    ) -> Result<Self, Self::Rejection> {
        // Extract token from Authorization header
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let token = match auth_header.and_then(|h| h.strip_prefix("Bearer ")) {
            Some(token) if !token.is_empty() => token,
            _ => {
                return Err(AppError::Unauthorized(
                    "Authorization header is required".to_string(),
                ))
            }
        };

        let claims = verify_token(&state.jwt_secret, token)?;
        Ok(AdminSession { claims })
    }
}
