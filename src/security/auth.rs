//! Credential verification chain.
//!
//! Order is a priority: bearer token, then API key, then session cookie.
//! Machine credentials are consulted before ambient browser state, and the
//! first method that succeeds ends the chain.

use std::str::FromStr;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use subtle::{Choice, ConstantTimeEq};
use thiserror::Error;

use crate::config::AuthenticationConfig;
use crate::security::session::{SessionStore, SessionStoreError};

pub const X_API_KEY: &str = "x-api-key";

/// Upper bound on clock-skew tolerance for token expiry.
pub const MAX_LEEWAY_SECS: u64 = 300;

/// Which link of the chain accepted the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    Bearer,
    ApiKey,
    Session,
}

/// Fixed metadata granted to API-key callers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyMetadata {
    pub key_type: &'static str,
    pub rate_limit: u64,
}

/// Result of running the chain. Attached to admitted requests as an
/// extension so handlers can read the subject.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AuthOutcome {
    pub authenticated: bool,
    pub subject_id: Option<String>,
    pub method: Option<AuthMethod>,
    pub api_key: Option<ApiKeyMetadata>,
    pub reason: Option<String>,
    /// At least one credential was offered, even if none verified.
    #[serde(skip)]
    pub credentials_presented: bool,
}

impl AuthOutcome {
    /// Outcome for requests that were not required to authenticate.
    pub fn anonymous() -> Self {
        Self::default()
    }

    fn success(method: AuthMethod, subject_id: Option<String>) -> Self {
        Self {
            authenticated: true,
            subject_id,
            method: Some(method),
            credentials_presented: true,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthConfigError {
    #[error("unsupported JWT algorithm '{0}'")]
    Algorithm(String),
    #[error("leeway of {0}s exceeds the {max}s maximum", max = MAX_LEEWAY_SECS)]
    Leeway(u64),
}

#[derive(Debug, Deserialize)]
struct Claims {
    exp: Option<u64>,
    sub: Option<String>,
    #[serde(rename = "userId")]
    user_id: Option<String>,
}

pub struct Authenticator {
    decoding_key: Option<DecodingKey>,
    validation: Validation,
    api_keys: Vec<String>,
    api_key_rate_limit: u64,
    session_cookie: String,
    sessions: Option<Arc<dyn SessionStore>>,
}

impl Authenticator {
    pub fn from_config(
        config: &AuthenticationConfig,
        sessions: Option<Arc<dyn SessionStore>>,
    ) -> Result<Self, AuthConfigError> {
        let algorithm = Algorithm::from_str(&config.jwt_algorithm)
            .ok()
            .filter(|a| matches!(a, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512))
            .ok_or_else(|| AuthConfigError::Algorithm(config.jwt_algorithm.clone()))?;

        if config.leeway_secs > MAX_LEEWAY_SECS {
            return Err(AuthConfigError::Leeway(config.leeway_secs));
        }

        let mut validation = Validation::new(algorithm);
        validation.leeway = config.leeway_secs;
        validation.validate_aud = false;
        // `exp` is checked when present; tokens without it are accepted.
        validation.required_spec_claims.clear();

        Ok(Self {
            decoding_key: config
                .jwt_secret
                .as_ref()
                .map(|s| DecodingKey::from_secret(s.as_bytes())),
            validation,
            api_keys: config.api_keys.clone(),
            api_key_rate_limit: config.api_key_rate_limit,
            session_cookie: config.session_cookie.clone(),
            sessions,
        })
    }

    /// Run the chain. Only a failing session store is an error.
    pub async fn authenticate(&self, headers: &HeaderMap) -> Result<AuthOutcome, SessionStoreError> {
        let mut failure: Option<String> = None;
        let mut presented = false;

        if let Some(token) = bearer_token(headers) {
            presented = true;
            match self.verify_bearer(token) {
                Ok(subject) => return Ok(AuthOutcome::success(AuthMethod::Bearer, subject)),
                Err(reason) => {
                    tracing::debug!(reason = %reason, "Bearer token rejected");
                    failure.get_or_insert(reason);
                }
            }
        }

        if let Some(key) = headers.get(X_API_KEY).and_then(|v| v.to_str().ok()) {
            presented = true;
            if self.api_key_matches(key) {
                let mut outcome = AuthOutcome::success(AuthMethod::ApiKey, Some("api_user".to_string()));
                outcome.api_key = Some(ApiKeyMetadata {
                    key_type: "standard",
                    rate_limit: self.api_key_rate_limit,
                });
                return Ok(outcome);
            }
            failure.get_or_insert_with(|| "unknown API key".to_string());
        }

        if let Some(session_id) = cookie(headers, &self.session_cookie) {
            presented = true;
            match &self.sessions {
                Some(store) => match store.lookup(session_id).await? {
                    Some(session) if session.is_active() => {
                        return Ok(AuthOutcome::success(AuthMethod::Session, Some(session.user_id)));
                    }
                    Some(_) => {
                        failure.get_or_insert_with(|| "session expired".to_string());
                    }
                    None => {
                        failure.get_or_insert_with(|| "unknown session".to_string());
                    }
                },
                None => {
                    failure.get_or_insert_with(|| "sessions are not accepted".to_string());
                }
            }
        }

        Ok(AuthOutcome {
            reason: Some(failure.unwrap_or_else(|| "No valid authentication method found".to_string())),
            credentials_presented: presented,
            ..AuthOutcome::default()
        })
    }

    fn verify_bearer(&self, token: &str) -> Result<Option<String>, String> {
        let key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| "bearer tokens are not accepted".to_string())?;

        match jsonwebtoken::decode::<Claims>(token, key, &self.validation) {
            Ok(data) => {
                // A token is dead from its `exp` second onwards.
                let now = jsonwebtoken::get_current_timestamp();
                if data.claims.exp.is_some_and(|exp| exp.saturating_add(self.validation.leeway) <= now) {
                    return Err("token expired".to_string());
                }
                Ok(data.claims.sub.or(data.claims.user_id))
            }
            Err(e) => Err(match e.kind() {
                ErrorKind::ExpiredSignature => "token expired".to_string(),
                ErrorKind::InvalidSignature => "token signature mismatch".to_string(),
                ErrorKind::InvalidAlgorithm => "token algorithm not accepted".to_string(),
                _ => "malformed token".to_string(),
            }),
        }
    }

    fn api_key_matches(&self, candidate: &str) -> bool {
        let hit = self
            .api_keys
            .iter()
            .fold(Choice::from(0), |acc, key| acc | key.as_bytes().ct_eq(candidate.as_bytes()));
        hit.into()
    }
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::session::{MemorySessionStore, Session};
    use axum::http::HeaderValue;
    use jsonwebtoken::{EncodingKey, Header};
    use std::time::{SystemTime, UNIX_EPOCH};

    const SECRET: &str = "test-only-signing-key-0123456789abcdef";

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn token(secret: &str, claims: serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    fn authenticator(sessions: Option<Arc<dyn SessionStore>>) -> Authenticator {
        let config = AuthenticationConfig {
            required: true,
            jwt_secret: Some(SECRET.to_string()),
            api_keys: vec!["key-alpha".into(), "key-beta".into()],
            ..AuthenticationConfig::default()
        };
        Authenticator::from_config(&config, sessions).unwrap()
    }

    fn headers(pairs: &[(&'static str, String)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(*name, HeaderValue::from_str(value).unwrap());
        }
        map
    }

    #[tokio::test]
    async fn test_valid_bearer_token() {
        let jwt = token(SECRET, serde_json::json!({"sub": "user-7", "exp": now() + 600}));
        let outcome = authenticator(None)
            .authenticate(&headers(&[("authorization", format!("Bearer {}", jwt))]))
            .await
            .unwrap();

        assert!(outcome.authenticated);
        assert_eq!(outcome.method, Some(AuthMethod::Bearer));
        assert_eq!(outcome.subject_id.as_deref(), Some("user-7"));
    }

    #[tokio::test]
    async fn test_expired_token_rejected_but_api_key_succeeds() {
        let expired = token(SECRET, serde_json::json!({"sub": "user-7", "exp": now() - 3600}));
        let auth = authenticator(None);

        let outcome = auth
            .authenticate(&headers(&[("authorization", format!("Bearer {}", expired))]))
            .await
            .unwrap();
        assert!(!outcome.authenticated);
        assert!(outcome.credentials_presented);
        assert_eq!(outcome.reason.as_deref(), Some("token expired"));

        let outcome = auth
            .authenticate(&headers(&[
                ("authorization", format!("Bearer {}", expired)),
                ("x-api-key", "key-beta".into()),
            ]))
            .await
            .unwrap();
        assert!(outcome.authenticated);
        assert_eq!(outcome.method, Some(AuthMethod::ApiKey));
        assert_eq!(
            outcome.api_key,
            Some(ApiKeyMetadata {
                key_type: "standard",
                rate_limit: 1000
            })
        );
    }

    #[tokio::test]
    async fn test_token_expiring_this_second_rejected() {
        let jwt = token(SECRET, serde_json::json!({"sub": "user-7", "exp": now()}));
        let outcome = authenticator(None)
            .authenticate(&headers(&[("authorization", format!("Bearer {}", jwt))]))
            .await
            .unwrap();
        assert!(!outcome.authenticated);
        assert_eq!(outcome.reason.as_deref(), Some("token expired"));
    }

    #[test]
    fn test_rejects_excessive_leeway() {
        let config = AuthenticationConfig {
            leeway_secs: 9_000_000_000_000_000_000,
            ..AuthenticationConfig::default()
        };
        assert!(matches!(
            Authenticator::from_config(&config, None),
            Err(AuthConfigError::Leeway(_))
        ));
    }

    #[tokio::test]
    async fn test_forged_signature_rejected() {
        let forged = token("attacker-key", serde_json::json!({"sub": "admin", "exp": now() + 600}));
        let outcome = authenticator(None)
            .authenticate(&headers(&[("authorization", format!("Bearer {}", forged))]))
            .await
            .unwrap();
        assert!(!outcome.authenticated);
        assert_eq!(outcome.reason.as_deref(), Some("token signature mismatch"));
    }

    #[tokio::test]
    async fn test_bearer_refused_without_secret() {
        let config = AuthenticationConfig::default();
        let auth = Authenticator::from_config(&config, None).unwrap();
        let jwt = token(SECRET, serde_json::json!({"sub": "x"}));
        let outcome = auth
            .authenticate(&headers(&[("authorization", format!("Bearer {}", jwt))]))
            .await
            .unwrap();
        assert!(!outcome.authenticated);
        assert_eq!(outcome.reason.as_deref(), Some("bearer tokens are not accepted"));
    }

    #[tokio::test]
    async fn test_session_cookie() {
        let store = Arc::new(MemorySessionStore::new());
        store.insert("sess_live", Session { user_id: "user-1".into(), expires_at: now() + 600 });
        store.insert("sess_old", Session { user_id: "user-2".into(), expires_at: now() - 1 });
        let auth = authenticator(Some(store));

        let outcome = auth
            .authenticate(&headers(&[("cookie", "theme=dark; session=sess_live".into())]))
            .await
            .unwrap();
        assert!(outcome.authenticated);
        assert_eq!(outcome.method, Some(AuthMethod::Session));
        assert_eq!(outcome.subject_id.as_deref(), Some("user-1"));

        let outcome = auth
            .authenticate(&headers(&[("cookie", "session=sess_old".into())]))
            .await
            .unwrap();
        assert!(!outcome.authenticated);
        assert_eq!(outcome.reason.as_deref(), Some("session expired"));
    }

    #[tokio::test]
    async fn test_api_key_checked_before_session() {
        let store = Arc::new(MemorySessionStore::new());
        store.insert("s", Session { user_id: "browser-user".into(), expires_at: now() + 600 });
        let outcome = authenticator(Some(store))
            .authenticate(&headers(&[
                ("x-api-key", "key-alpha".into()),
                ("cookie", "session=s".into()),
            ]))
            .await
            .unwrap();
        assert_eq!(outcome.method, Some(AuthMethod::ApiKey));
    }

    #[tokio::test]
    async fn test_no_credentials() {
        let outcome = authenticator(None).authenticate(&HeaderMap::new()).await.unwrap();
        assert!(!outcome.authenticated);
        assert!(!outcome.credentials_presented);
        assert_eq!(outcome.reason.as_deref(), Some("No valid authentication method found"));
    }

    #[test]
    fn test_rejects_asymmetric_algorithm() {
        let config = AuthenticationConfig {
            jwt_algorithm: "RS256".into(),
            ..AuthenticationConfig::default()
        };
        assert!(matches!(
            Authenticator::from_config(&config, None),
            Err(AuthConfigError::Algorithm(_))
        ));
    }
}
