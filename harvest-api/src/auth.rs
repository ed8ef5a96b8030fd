use axum::{
    extract::Request,
    http::{header::AUTHORIZATION, StatusCode},
    middleware::Next,
    response::Response,
};
use harvest_core::types::{Actor, Role};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::state::ApiState;

/// JWT claims carried by every authenticated request.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    pub id: Uuid,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

/// Extract a bearer token from an Authorization header value.
pub fn extract_token(auth_header: Option<&str>) -> Option<String> {
    auth_header?
        .strip_prefix("Bearer ")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Issue a token for `actor`. Sign-in lives elsewhere; this is used by
/// tooling and tests.
pub fn generate_token(actor: &Actor, secret: &str, expires_in_days: u64) -> Result<String, StatusCode> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .as_secs() as usize;

    let claims = Claims {
        id: actor.id,
        name: actor.name.clone(),
        role: actor.role,
        exp: now + (expires_in_days * 24 * 60 * 60) as usize,
    };

    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_ref())).map_err(|e| {
        tracing::error!("Failed to generate JWT token: {}", e);
        StatusCode::INTERNAL_SERVER_ERROR
    })
}

/// Verify a token and turn its claims into the calling actor.
pub fn verify_token(token: &str, secret: &str) -> Result<Actor, StatusCode> {
    let decoding_key = DecodingKey::from_secret(secret.as_ref());

    match decode::<Claims>(token, &decoding_key, &Validation::default()) {
        Ok(data) => Ok(Actor::new(data.claims.id, data.claims.name, data.claims.role)),
        Err(e) => {
            tracing::debug!("JWT verification failed: {}", e);
            Err(StatusCode::UNAUTHORIZED)
        }
    }
}

/// Axum middleware that authenticates every route except the health check
/// and the websocket, which verifies its own token at upgrade time.
pub async fn auth_middleware(mut req: Request, next: Next) -> Result<Response, StatusCode> {
    let path = req.uri().path();
    if path == "/health" || path.starts_with("/ws") {
        return Ok(next.run(req).await);
    }

    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let Some(token) = extract_token(auth_header) else {
        tracing::debug!("Missing Authorization header");
        return Err(StatusCode::UNAUTHORIZED);
    };

    let state = req
        .extensions()
        .get::<ApiState>()
        .ok_or(StatusCode::INTERNAL_SERVER_ERROR)?;

    let actor = verify_token(&token, state.jwt_secret())?;
    tracing::debug!("Authenticated {} {}", actor.role, actor.id);
    req.extensions_mut().insert(actor);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SECRET: &str = "test-secret";

    #[test]
    fn test_extract_token() {
        assert_eq!(extract_token(Some("Bearer abc ")), Some("abc".to_string()));
        assert_eq!(extract_token(Some("Basic abc")), None);
        assert_eq!(extract_token(Some("Bearer ")), None);
        assert_eq!(extract_token(None), None);
    }

    #[test]
    fn test_token_carries_actor() {
        let actor = Actor::new(Uuid::new_v4(), "Food Bank", Role::Organization);
        let token = generate_token(&actor, SECRET, 1).unwrap();
        assert_eq!(verify_token(&token, SECRET).unwrap(), actor);
    }

    #[test]
    fn test_wrong_secret_is_unauthorized() {
        let actor = Actor::new(Uuid::new_v4(), "Donor", Role::Donor);
        let token = generate_token(&actor, SECRET, 1).unwrap();
        assert_eq!(verify_token(&token, "other"), Err(StatusCode::UNAUTHORIZED));
    }

    #[test]
    fn test_expired_token_is_unauthorized() {
        let claims = Claims {
            id: Uuid::new_v4(),
            name: "Old".into(),
            role: Role::Admin,
            exp: 1_000,
        };
        let token = encode(&Header::default(), &claims, &EncodingKey::from_secret(SECRET.as_ref())).unwrap();
        assert_eq!(verify_token(&token, SECRET), Err(StatusCode::UNAUTHORIZED));
    }
}
