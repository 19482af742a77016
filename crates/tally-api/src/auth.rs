use std::sync::Arc;

use axum::http::HeaderMap;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use serde_json::Value;

use crate::config::AppConfig;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct AuthenticatedUser {
    pub user_id: i64,
}

/// Verifies bearer tokens minted by the account service (HS256, shared secret)
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    config: Arc<AppConfig>,
}

impl TokenVerifier {
    pub fn new(config: Arc<AppConfig>) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(config.auth_secret.as_bytes()),
            config,
        }
    }

    pub fn verify_access_token(&self, token: &str) -> Result<AuthenticatedUser, AppError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_aud = false;
        validation.set_issuer(&[self.config.jwt_issuer.as_str()]);

        let decoded = decode::<AccessClaims>(token, &self.decoding_key, &validation)
            .map_err(|error| {
                AppError::unauthorized(format!("Token validation failed: {}", sanitize(&error)))
            })?;

        if !audience_matches(decoded.claims.aud.as_ref(), &self.config.jwt_audience) {
            return Err(AppError::unauthorized("Token audience is not allowed"));
        }
        validate_temporal_claims(&decoded.claims, self.config.auth_clock_skew)?;

        let user_id = decoded
            .claims
            .sub
            .trim()
            .parse::<i64>()
            .map_err(|_| AppError::unauthorized("Token subject is not a valid user id"))?;
        if user_id <= 0 {
            return Err(AppError::unauthorized("Token subject is not a valid user id"));
        }

        Ok(AuthenticatedUser { user_id })
    }
}

pub fn extract_bearer_token(headers: &HeaderMap) -> Result<&str, AppError> {
    let header = headers
        .get("authorization")
        .ok_or_else(|| AppError::unauthorized("Missing Authorization header"))?
        .to_str()
        .map_err(|_| AppError::unauthorized("Authorization header is not valid UTF-8"))?;

    let (scheme, token) = header
        .split_once(' ')
        .ok_or_else(|| AppError::unauthorized("Authorization header must be `Bearer <token>`"))?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AppError::unauthorized(
            "Authorization scheme must be `Bearer`",
        ));
    }
    let token = token.trim();
    if token.is_empty() {
        return Err(AppError::unauthorized("Bearer token is empty"));
    }

    Ok(token)
}

#[derive(Debug, Deserialize)]
struct AccessClaims {
    sub: String,
    aud: Option<Value>,
    exp: Option<i64>,
    iat: Option<i64>,
    nbf: Option<i64>,
}

fn validate_temporal_claims(
    claims: &AccessClaims,
    clock_skew: std::time::Duration,
) -> Result<(), AppError> {
    let now = chrono::Utc::now().timestamp();
    let skew = i64::try_from(clock_skew.as_secs()).unwrap_or(0);

    let exp = claims
        .exp
        .ok_or_else(|| AppError::unauthorized("Token missing `exp` claim"))?;
    if exp <= now.saturating_sub(skew) {
        return Err(AppError::unauthorized("Token is expired"));
    }

    let iat = claims
        .iat
        .ok_or_else(|| AppError::unauthorized("Token missing `iat` claim"))?;
    if iat > now.saturating_add(skew) {
        return Err(AppError::unauthorized("Token `iat` is in the future"));
    }

    if let Some(nbf) = claims.nbf {
        if nbf > now.saturating_add(skew) {
            return Err(AppError::unauthorized("Token is not yet valid"));
        }
    }

    Ok(())
}

fn audience_matches(aud: Option<&Value>, expected: &str) -> bool {
    let Some(aud) = aud else {
        return false;
    };

    match aud {
        Value::String(value) => value == expected,
        Value::Array(values) => values
            .iter()
            .filter_map(Value::as_str)
            .any(|value| value == expected),
        _ => false,
    }
}

fn sanitize(error: &impl std::fmt::Display) -> String {
    error.to_string().replace('\n', " ").trim().to_string()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use axum::http::HeaderValue;
    use jsonwebtoken::{encode, EncodingKey, Header};
    use serde::Serialize;

    use super::*;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    #[derive(Serialize)]
    struct TestClaims {
        sub: String,
        aud: String,
        iss: String,
        exp: i64,
        iat: i64,
    }

    fn verifier() -> TokenVerifier {
        let mut map = HashMap::new();
        map.insert("TALLY_AUTH_SECRET", SECRET);
        let config =
            AppConfig::from_lookup(|key| map.get(key).map(|value| (*value).to_string())).unwrap();
        TokenVerifier::new(Arc::new(config))
    }

    fn mint(sub: &str, aud: &str, iss: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = TestClaims {
            sub: sub.to_string(),
            aud: aud.to_string(),
            iss: iss.to_string(),
            exp: now + exp_offset,
            iat: now,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn bearer_token_extractor_accepts_standard_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "authorization",
            HeaderValue::from_static("Bearer abc.def.ghi"),
        );

        assert_eq!(extract_bearer_token(&headers).unwrap(), "abc.def.ghi");
    }

    #[test]
    fn bearer_token_extractor_rejects_wrong_scheme() {
        let mut headers = HeaderMap::new();
        headers.insert("authorization", HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer_token(&headers).is_err());
    }

    #[test]
    fn verify_accepts_valid_token() {
        let verifier = verifier();
        let token = mint("42", "tally", "tally-auth", 300);
        let user = verifier.verify_access_token(&token).unwrap();
        assert_eq!(user.user_id, 42);
    }

    #[test]
    fn verify_rejects_wrong_audience() {
        let verifier = verifier();
        let token = mint("42", "someone-else", "tally-auth", 300);
        let err = verifier.verify_access_token(&token).unwrap_err();
        assert!(err.to_string().contains("audience"));
    }

    #[test]
    fn verify_rejects_wrong_issuer() {
        let verifier = verifier();
        let token = mint("42", "tally", "impostor", 300);
        assert!(verifier.verify_access_token(&token).is_err());
    }

    #[test]
    fn verify_rejects_non_numeric_subject() {
        let verifier = verifier();
        let token = mint("alice", "tally", "tally-auth", 300);
        let err = verifier.verify_access_token(&token).unwrap_err();
        assert!(err.to_string().contains("subject"));
    }

    #[test]
    fn temporal_claims_require_exp_and_iat() {
        let claims = AccessClaims {
            sub: "1".to_string(),
            aud: Some(Value::String("tally".to_string())),
            exp: None,
            iat: None,
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(60)).unwrap_err();
        assert!(err.to_string().contains("missing `exp`"));
    }

    #[test]
    fn temporal_claims_reject_future_iat() {
        let now = chrono::Utc::now().timestamp();
        let claims = AccessClaims {
            sub: "1".to_string(),
            aud: Some(Value::String("tally".to_string())),
            exp: Some(now + 300),
            iat: Some(now + 120),
            nbf: None,
        };
        let err = validate_temporal_claims(&claims, Duration::from_secs(30)).unwrap_err();
        assert!(err.to_string().contains("future"));
    }

    #[test]
    fn audience_matches_string_or_array() {
        assert!(audience_matches(
            Some(&Value::String("tally".to_string())),
            "tally"
        ));
        assert!(audience_matches(
            Some(&Value::Array(vec![
                Value::String("other".to_string()),
                Value::String("tally".to_string())
            ])),
            "tally"
        ));
        assert!(!audience_matches(
            Some(&Value::String("other".to_string())),
            "tally"
        ));
    }
}
