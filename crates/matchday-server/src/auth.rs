//! Bearer-token authentication.
//!
//! Participants get a random token when they are registered. Only its
//! BLAKE3 hash is stored; requests present the token either in the
//! `Authorization: Bearer` header or, for WebSocket upgrades from browsers,
//! in the `token` query parameter.

use std::collections::HashMap;

use axum::extract::{FromRequestParts, Query};
use axum::http::request::Parts;
use axum::http::{HeaderMap, Uri};
use rand::RngCore;
use subtle::ConstantTimeEq;
use tracing::debug;

use matchday_store::Participant;

use crate::api::AppState;
use crate::config::ServerConfig;
use crate::error::ServerError;

const TOKEN_BYTES: usize = 32;

/// Generate a fresh participant token (64 hex chars).
pub fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash stored in the participant directory for a token.
pub fn hash_token(token: &str) -> String {
    blake3::hash(token.as_bytes()).to_hex().to_string()
}

fn bearer(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn query_token(uri: &Uri) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(uri).ok()?;
    params.get("token").filter(|t| !t.is_empty()).cloned()
}

/// The participant behind the request's bearer token.
pub struct Authenticated(pub Participant);

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = bearer(&parts.headers)
            .map(str::to_string)
            .or_else(|| query_token(&parts.uri))
            .ok_or(ServerError::Unauthorized)?;

        let participant = state
            .store
            .participant_by_token_hash(hash_token(&token))
            .await?
            .ok_or_else(|| {
                debug!("Rejected unknown bearer token");
                ServerError::Unauthorized
            })?;

        Ok(Authenticated(participant))
    }
}

/// Check the admin bearer token in constant time.
pub fn verify_admin_token(headers: &HeaderMap, config: &ServerConfig) -> Result<(), ServerError> {
    let Some(ref expected) = config.admin_token else {
        return Err(ServerError::Forbidden(
            "Admin API is disabled (no ADMIN_TOKEN configured)".into(),
        ));
    };

    let token = bearer(headers).unwrap_or("");

    let token_bytes = token.as_bytes();
    let expected_bytes = expected.as_bytes();
    if token_bytes.len() != expected_bytes.len()
        || token_bytes.ct_eq(expected_bytes).unwrap_u8() != 1
    {
        return Err(ServerError::Forbidden("Invalid admin token".into()));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_tokens_are_unique_hex() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(hex::decode(&a).is_ok());
        assert_ne!(a, b);
        assert_eq!(hash_token(&a), hash_token(&a));
        assert_ne!(hash_token(&a), hash_token(&b));
    }

    #[test]
    fn test_query_token() {
        let token = |uri: &str| query_token(&uri.parse::<Uri>().unwrap());
        assert_eq!(token("/ws?token=abc").as_deref(), Some("abc"));
        assert_eq!(token("/ws?x=1&token=abc").as_deref(), Some("abc"));
        assert_eq!(token("/ws?token=a%2Bb").as_deref(), Some("a+b"));
        assert_eq!(token("/ws?token="), None);
        assert_eq!(token("/ws"), None);
    }

    #[test]
    fn test_admin_token() {
        let config = ServerConfig {
            admin_token: Some("secret".into()),
            ..ServerConfig::default()
        };

        let mut headers = HeaderMap::new();
        assert!(verify_admin_token(&headers, &config).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer wrong!"));
        assert!(verify_admin_token(&headers, &config).is_err());

        headers.insert("authorization", HeaderValue::from_static("Bearer secret"));
        assert!(verify_admin_token(&headers, &config).is_ok());

        let disabled = ServerConfig::default();
        assert!(matches!(
            verify_admin_token(&headers, &disabled),
            Err(ServerError::Forbidden(_))
        ));
    }
}
