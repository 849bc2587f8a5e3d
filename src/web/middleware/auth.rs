//! JWT authentication middleware.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use axum::{
    body::Body,
    extract::{FromRequestParts, Query},
    http::{header::AUTHORIZATION, request::Parts, Request},
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::web::error::ApiError;
use crate::{ChatError, Result};

/// JWT claims structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID).
    pub sub: String,
    /// Issued at timestamp.
    pub iat: u64,
    /// Expiration timestamp.
    pub exp: u64,
}

/// Keys and validation settings for JWT authentication.
#[derive(Clone)]
pub struct JwtState {
    /// Encoding key for issuing tokens.
    pub encoding_key: EncodingKey,
    /// Decoding key for JWT verification.
    pub decoding_key: DecodingKey,
    /// Validation settings.
    pub validation: Validation,
}

impl JwtState {
    /// Create a new JWT state from a secret key.
    pub fn new(secret: &str) -> Self {
        let mut validation = Validation::default();
        validation.validate_exp = true;

        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation,
        }
    }

    /// Issue a token for `user_id` valid for `ttl`.
    ///
    /// The server itself never issues tokens. This is for tests and local tooling.
    pub fn issue(&self, user_id: &str, ttl: Duration) -> Result<String> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|e| ChatError::Auth(e.to_string()))?
            .as_secs();
        let claims = JwtClaims {
            sub: user_id.to_string(),
            iat: now,
            exp: now + ttl.as_secs(),
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(|e| ChatError::Auth(format!("failed to issue token: {e}")))
    }

    /// Verify a token and return its claims.
    pub fn verify(&self, token: &str) -> Result<JwtClaims> {
        decode::<JwtClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ChatError::Auth(format!("invalid token: {e}")))
    }
}

#[derive(Debug, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

/// Pull a token from the `Authorization: Bearer` header, falling back to
/// the `token` query parameter (browsers cannot set headers on WebSocket
/// upgrades).
fn extract_token(parts: &Parts) -> Option<String> {
    let header_token = parts
        .headers
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|token| token.to_string());

    header_token.or_else(|| {
        Query::<TokenQuery>::try_from_uri(&parts.uri)
            .ok()
            .and_then(|Query(query)| query.token)
    })
}

/// Extractor for authenticated users.
///
/// The handler receives the JWT claims if the token is valid.
#[derive(Debug, Clone)]
pub struct AuthUser(pub JwtClaims);

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> std::result::Result<Self, Self::Rejection> {
        let token = extract_token(parts).ok_or_else(|| ApiError::unauthorized("Missing authorization"))?;

        // Set by `jwt_auth`
        let jwt_state = parts
            .extensions
            .get::<Arc<JwtState>>()
            .ok_or_else(|| ApiError::internal("JWT state not configured"))?;

        let claims = jwt_state.verify(&token).map_err(|e| {
            tracing::debug!("JWT validation failed: {}", e);
            ApiError::unauthorized("Invalid or expired token")
        })?;

        Ok(AuthUser(claims))
    }
}

/// Middleware function to inject JWT state into request extensions.
pub async fn jwt_auth(jwt_state: Arc<JwtState>, mut request: Request<Body>, next: Next) -> Response {
    request.extensions_mut().insert(jwt_state);
    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_issue_and_verify() {
        let state = JwtState::new("secret");
        let token = state.issue("alice", Duration::from_secs(60)).unwrap();

        let claims = state.verify(&token).unwrap();
        assert_eq!(claims.sub, "alice");
        assert!(claims.exp > claims.iat);
    }

    #[test]
    fn test_verify_rejects_other_secret() {
        let token = JwtState::new("one")
            .issue("alice", Duration::from_secs(60))
            .unwrap();

        let result = JwtState::new("two").verify(&token);
        assert!(matches!(result, Err(ChatError::Auth(_))));
    }

    #[test]
    fn test_verify_rejects_expired() {
        let state = JwtState::new("secret");
        let claims = JwtClaims {
            sub: "alice".to_string(),
            iat: 1,
            exp: 2,
        };
        let token = encode(&Header::default(), &claims, &state.encoding_key).unwrap();

        assert!(state.verify(&token).is_err());
    }

    #[test]
    fn test_extract_token_prefers_header() {
        let (parts, _) = Request::builder()
            .uri("/api/chatrooms/1/ws?token=from-query")
            .header(AUTHORIZATION, "Bearer from-header")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(extract_token(&parts).as_deref(), Some("from-header"));

        let (parts, _) = Request::builder()
            .uri("/api/chatrooms/1/ws?token=from-query")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(extract_token(&parts).as_deref(), Some("from-query"));

        let (parts, _) = Request::builder()
            .uri("/api/chatrooms/1/ws")
            .body(())
            .unwrap()
            .into_parts();
        assert_eq!(extract_token(&parts), None);
    }
}
