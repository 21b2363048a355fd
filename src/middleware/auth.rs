use axum::{
    extract::{Request, State},
    http::{HeaderMap, StatusCode},
    middleware::Next,
    response::{IntoResponse, Json, Response},
};
use chrono::Utc;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::models::identity::{Identity, Role};
use crate::AppState;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: usize,
    pub role: Option<String>,
}

fn reject(status: StatusCode, error: &str, message: &str) -> Response {
    (status, Json(json!({ "error": error, "message": message }))).into_response()
}

fn parse_role(raw: Option<&str>) -> Option<Role> {
    match raw?.to_ascii_lowercase().as_str() {
        "issuer" => Some(Role::Issuer),
        "candidate" => Some(Role::Candidate),
        "admin" => Some(Role::Admin),
        _ => None,
    }
}

/// Decodes the bearer token into the caller's identity.
fn authenticate(headers: &HeaderMap, secret: &str) -> std::result::Result<Identity, Response> {
    let Some(auth_header) = headers.get(axum::http::header::AUTHORIZATION) else {
        return Err(reject(StatusCode::UNAUTHORIZED, "missing_authorization", "bearer token required"));
    };
    let Ok(auth_str) = auth_header.to_str() else {
        return Err(reject(StatusCode::UNAUTHORIZED, "bad_authorization", "malformed authorization header"));
    };
    let Some(token) = auth_str.strip_prefix("Bearer ") else {
        return Err(reject(StatusCode::UNAUTHORIZED, "unsupported_scheme", "only bearer tokens are accepted"));
    };

    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = true;
    let data = decode::<Claims>(token, &DecodingKey::from_secret(secret.as_bytes()), &validation)
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid_token", "token is invalid or expired"))?;

    let user_id = Uuid::parse_str(&data.claims.sub)
        .map_err(|_| reject(StatusCode::UNAUTHORIZED, "invalid_token", "token subject is not a user id"))?;
    let role = parse_role(data.claims.role.as_deref())
        .ok_or_else(|| reject(StatusCode::FORBIDDEN, "forbidden", "token carries no known role"))?;
    Ok(Identity::new(user_id, role))
}

async fn require_roles(state: &AppState, mut req: Request, next: Next, allowed: &[Role]) -> Response {
    let identity = match authenticate(req.headers(), &state.config.jwt_secret) {
        Ok(identity) => identity,
        Err(resp) => return resp,
    };
    if !allowed.contains(&identity.role) {
        return reject(StatusCode::FORBIDDEN, "forbidden", "role may not use this endpoint");
    }
    req.extensions_mut().insert(identity);
    next.run(req).await
}

pub async fn require_issuer(State(state): State<AppState>, req: Request, next: Next) -> Response {
    require_roles(&state, req, next, &[Role::Issuer, Role::Admin]).await
}

pub async fn require_candidate(State(state): State<AppState>, req: Request, next: Next) -> Response {
    require_roles(&state, req, next, &[Role::Candidate]).await
}

/// Signs a token in the format the middleware accepts. Token issuance
/// belongs to the identity provider; this exists for tooling and tests.
pub fn issue_token(secret: &str, user_id: Uuid, role: Role, ttl: chrono::Duration) -> Result<String> {
    let role = match role {
        Role::Issuer => "issuer",
        Role::Candidate => "candidate",
        Role::Admin => "admin",
    };
    let claims = Claims {
        sub: user_id.to_string(),
        exp: (Utc::now() + ttl).timestamp().max(0) as usize,
        role: Some(role.to_string()),
    };
    encode(&Header::new(Algorithm::HS256), &claims, &EncodingKey::from_secret(secret.as_bytes()))
        .map_err(|e| Error::Internal(format!("could not sign token: {}", e)))
}
