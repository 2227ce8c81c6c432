//! Bearer credential verification at connect time.
//!
//! The gateway never issues credentials; it only verifies tokens minted by
//! the external auth service using the shared HS256 secret.

use crate::error::{GatewayError, Result};
use axum::http::{header::AUTHORIZATION, HeaderMap};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// JWT claims carried by the bearer credential.
#[derive(Debug, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (user id).
    pub sub: String,
    /// Expiration time (unix seconds).
    pub exp: i64,
}

/// Verifies bearer credentials against the shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    /// Create a verifier from the shared secret.
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Verify a token and return the authenticated user id.
    pub fn verify(&self, token: &str) -> Result<String> {
        let data = decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| GatewayError::Auth(e.to_string()))?;
        Ok(data.claims.sub)
    }
}

/// Extract the bearer token from the `token` query parameter or the
/// `Authorization: Bearer` header.
pub fn extract_token(query_token: Option<&str>, headers: &HeaderMap) -> Option<String> {
    if let Some(token) = query_token {
        if !token.is_empty() {
            return Some(token.to_string());
        }
    }

    headers
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map(|t| t.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};

    const SECRET: &str = "test-secret";

    fn make_token(sub: &str, exp: i64) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            exp,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    #[test]
    fn test_verify_valid_token() {
        let verifier = TokenVerifier::new(SECRET);
        let token = make_token("alice", now() + 3600);
        assert_eq!(verifier.verify(&token).unwrap(), "alice");
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let verifier = TokenVerifier::new(SECRET);
        // Past the default validation leeway.
        let token = make_token("alice", now() - 3600);
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn test_verify_rejects_garbage_and_wrong_secret() {
        let verifier = TokenVerifier::new(SECRET);
        assert!(verifier.verify("not-a-token").is_err());

        let other = Claims {
            sub: "alice".to_string(),
            exp: now() + 3600,
        };
        let forged = encode(
            &Header::default(),
            &other,
            &EncodingKey::from_secret(b"other-secret"),
        )
        .unwrap();
        assert!(verifier.verify(&forged).is_err());
    }

    #[test]
    fn test_extract_token_prefers_query_param() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));

        assert_eq!(
            extract_token(Some("from-query"), &headers).as_deref(),
            Some("from-query")
        );
        assert_eq!(extract_token(None, &headers).as_deref(), Some("from-header"));
        assert_eq!(extract_token(None, &HeaderMap::new()), None);
    }
}
