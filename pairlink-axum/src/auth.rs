//! Owner identification for control-plane and observer requests.
//!
//! The caller proves who they are with an HS256 JWT, sent either as a
//! cookie or as a bearer token. Ownership of the tenant itself is checked
//! by the session manager.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use pairlink_core::OwnerId;
use serde_json::{Map, Value};

use crate::{config::HttpConfig, error::HttpError, PairlinkAxumError, PairlinkState};

pub struct JwtVerifier {
    key: DecodingKey,
    validation: Validation,
    cookie_name: String,
    owner_claim: String,
}

impl JwtVerifier {
    pub fn new(secret: &str, cookie_name: impl Into<String>, owner_claim: impl Into<String>) -> Self {
        Self {
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
            cookie_name: cookie_name.into(),
            owner_claim: owner_claim.into(),
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(&config.jwt_secret, config.cookie_name.clone(), config.owner_claim.clone())
    }

    /// Decode `token` and pull the owner id out of its claims.
    pub fn verify(&self, token: &str) -> Result<OwnerId, HttpError> {
        let decoded = decode::<Map<String, Value>>(token, &self.key, &self.validation)
            .map_err(|e| HttpError::not_authenticated(format!("Invalid token: {e}")))?;

        let claims = decoded.claims;
        let owner = claims
            .get(&self.owner_claim)
            .or_else(|| claims.get("sub"))
            .and_then(|v| match v {
                Value::String(s) if !s.is_empty() => Some(s.clone()),
                Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .ok_or_else(|| HttpError::not_authenticated("Token carries no user id"))?;

        Ok(OwnerId::new(owner))
    }

    /// The cookie named `cookie_name`, else an `Authorization: Bearer` token.
    pub fn token_from_headers<'a>(&self, headers: &'a HeaderMap) -> Option<&'a str> {
        let from_cookie = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == self.cookie_name)
            .map(|(_, value)| value);

        from_cookie.or_else(|| {
            headers
                .get(header::AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.strip_prefix("Bearer "))
                .map(str::trim)
        })
    }
}

/// The authenticated caller.
#[derive(Debug, Clone)]
pub struct Owner(pub OwnerId);

impl FromRequestParts<PairlinkState> for Owner {
    type Rejection = PairlinkAxumError;

    async fn from_request_parts(parts: &mut Parts, state: &PairlinkState) -> Result<Self, Self::Rejection> {
        let token = state
            .auth
            .token_from_headers(&parts.headers)
            .ok_or_else(|| HttpError::not_authenticated("Unauthorized"))?;
        let owner = state.auth.verify(token)?;
        Ok(Owner(owner))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde_json::json;

    fn token(claims: Value) -> String {
        encode(&Header::default(), &claims, &EncodingKey::from_secret(b"s3cret")).unwrap()
    }

    fn exp() -> i64 {
        chrono::Utc::now().timestamp() + 3600
    }

    fn verifier() -> JwtVerifier {
        JwtVerifier::new("s3cret", "token", "userId")
    }

    #[test]
    fn owner_from_user_id_claim() {
        let owner = verifier()
            .verify(&token(json!({"userId": "u1", "exp": exp()})))
            .unwrap();
        assert_eq!(owner, OwnerId::from("u1"));
    }

    #[test]
    fn falls_back_to_sub() {
        let owner = verifier()
            .verify(&token(json!({"sub": "u2", "exp": exp()})))
            .unwrap();
        assert_eq!(owner.as_str(), "u2");
    }

    #[test]
    fn rejects_bad_signature_and_missing_owner() {
        let forged = encode(
            &Header::default(),
            &json!({"userId": "u1", "exp": exp()}),
            &EncodingKey::from_secret(b"other"),
        )
        .unwrap();
        assert!(verifier().verify(&forged).is_err());
        assert!(verifier().verify(&token(json!({"exp": exp()}))).is_err());
    }

    #[test]
    fn token_lookup_prefers_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_static("theme=dark; token=abc"));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer xyz"));
        assert_eq!(verifier().token_from_headers(&headers), Some("abc"));

        headers.remove(header::COOKIE);
        assert_eq!(verifier().token_from_headers(&headers), Some("xyz"));
    }
}
