//! RS256 bearer-token validation for the panel-facing router.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("invalid JWT public key: {0}")]
    InvalidKey(#[from] jsonwebtoken::errors::Error),
}

/// Verifies panel-issued RS256 tokens against the public key carried in the
/// secret-key payload. Built once at startup; cheap to share.
pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(public_key_pem: &str) -> Result<Self, AuthError> {
        let key = DecodingKey::from_rsa_pem(public_key_pem.as_bytes())?;
        let validation = Validation::new(Algorithm::RS256);
        Ok(Self { key, validation })
    }

    pub fn verify(&self, token: &str) -> bool {
        decode::<Value>(token, &self.key, &self.validation).is_ok()
    }
}

/// Extract the token from a `Bearer <token>` header. The scheme word is
/// matched case-insensitively, as the panel's HTTP client lowercases it.
fn bearer_token(header: &str) -> Option<&str> {
    let (scheme, token) = header.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") || token.is_empty() {
        return None;
    }
    Some(token)
}

/// Middleware rejecting unauthenticated requests with an empty 401.
pub async fn require_jwt(
    State(verifier): State<Arc<JwtVerifier>>,
    req: Request,
    next: Next,
) -> Response {
    let header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok());

    let token = match header.and_then(bearer_token) {
        Some(token) => token,
        None => {
            warn!(path = %req.uri().path(), "request without bearer token dropped");
            return StatusCode::UNAUTHORIZED.into_response();
        }
    };

    if !verifier.verify(token) {
        warn!(path = %req.uri().path(), "JWT validation failed, request dropped");
        return StatusCode::UNAUTHORIZED.into_response();
    }

    next.run(req).await
}
