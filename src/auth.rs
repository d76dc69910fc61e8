//! # Bearer Token Authentication
//!
//! The browser client logs in anonymously (`POST /auth/login`) and gets a
//! short-lived HS256 token. The token's `session_id` is what the rate limiter
//! counts against, so a token identifies one browser session rather than a
//! user account.
//!
//! Protected handlers take a [`Caller`] argument; the extractor rejects the
//! request with 401 before the handler runs.

use crate::config::AuthConfig;
use crate::error::AppError;
use crate::state::AppState;
use actix_web::dev::Payload;
use actix_web::http::header::AUTHORIZATION;
use actix_web::{web, FromRequest, HttpRequest};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::future::{ready, Ready};
use tracing::warn;

pub const ISSUER: &str = "time-traveler-api";
pub const DEFAULT_USER: &str = "demo-user";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: String,
    pub session_id: String,
    pub exp: i64,
    pub iat: i64,
    pub iss: String,
}

#[derive(Debug, Clone)]
pub struct IssuedToken {
    pub token: String,
    /// Seconds until expiry
    pub expires_in: i64,
    pub session_id: String,
}

#[derive(Debug, PartialEq, Eq)]
pub enum AuthError {
    MissingHeader,
    Expired,
    Invalid,
    Signing(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::MissingHeader => write!(f, "Authorization header required"),
            AuthError::Expired => write!(f, "Token has expired"),
            AuthError::Invalid => write!(f, "Invalid token"),
            AuthError::Signing(msg) => write!(f, "Could not sign token: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Signing(msg) => AppError::Internal(msg),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

pub struct TokenService {
    enabled: bool,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: Duration,
}

impl TokenService {
    pub fn new(config: &AuthConfig) -> Self {
        let secret = match config.jwt_secret.as_deref().filter(|s| !s.is_empty()) {
            Some(secret) => secret.to_string(),
            None => {
                if config.enabled {
                    warn!("JWT_SECRET not set; generated a per-process secret, tokens will not survive a restart");
                }
                random_token(32)
            }
        };

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[ISSUER]);
        validation.set_required_spec_claims(&["exp", "iat", "iss"]);
        validation.leeway = 0;

        Self {
            enabled: config.enabled,
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation,
            lifetime: Duration::hours(config.expiration_hours),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn lifetime_secs(&self) -> i64 {
        self.lifetime.num_seconds()
    }

    /// Issue a token. A fresh session id is generated unless one is given
    /// (token refresh keeps the session and with it the rate-limit history).
    pub fn issue(&self, user_id: &str, session_id: Option<String>) -> Result<IssuedToken, AuthError> {
        let now = Utc::now();
        let session_id = session_id.unwrap_or_else(|| random_token(16));
        let claims = Claims {
            user_id: user_id.to_string(),
            session_id: session_id.clone(),
            exp: (now + self.lifetime).timestamp(),
            iat: now.timestamp(),
            iss: ISSUER.to_string(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AuthError::Signing(err.to_string()))?;

        Ok(IssuedToken {
            token,
            expires_in: self.lifetime_secs(),
            session_id,
        })
    }

    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        decode::<Claims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::Expired,
                _ => AuthError::Invalid,
            })
    }

    /// Pull the bearer token out of an `Authorization` header value.
    pub fn verify_header(&self, header: Option<&str>) -> Result<Claims, AuthError> {
        let token = header
            .and_then(|value| value.strip_prefix("Bearer "))
            .map(str::trim)
            .filter(|token| !token.is_empty())
            .ok_or(AuthError::MissingHeader)?;
        self.verify(token)
    }
}

fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// The authenticated (or, with auth disabled, anonymous) caller of a request.
#[derive(Debug, Clone)]
pub struct Caller {
    pub claims: Option<Claims>,
    pub client_ip: String,
}

impl Caller {
    /// Rate limits follow the token's session; anonymous callers are keyed by
    /// address.
    pub fn rate_limit_key(&self) -> String {
        match &self.claims {
            Some(claims) => format!("session:{}", claims.session_id),
            None => format!("ip:{}", self.client_ip),
        }
    }
}

impl FromRequest for Caller {
    type Error = AppError;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        ready(authenticate(req))
    }
}

fn authenticate(req: &HttpRequest) -> Result<Caller, AppError> {
    let state = req
        .app_data::<web::Data<AppState>>()
        .ok_or_else(|| AppError::Internal("application state not registered".to_string()))?;

    let client_ip = req
        .connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string();

    if !state.tokens.is_enabled() {
        return Ok(Caller {
            claims: None,
            client_ip,
        });
    }

    let header = req.headers().get(AUTHORIZATION).and_then(|value| value.to_str().ok());
    let claims = state.tokens.verify_header(header)?;
    Ok(Caller {
        claims: Some(claims),
        client_ip,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> TokenService {
        TokenService::new(&AuthConfig {
            enabled: true,
            jwt_secret: Some("test-secret".to_string()),
            expiration_hours: 1,
        })
    }

    #[test]
    fn test_issue_and_verify() {
        let tokens = service();
        let issued = tokens.issue(DEFAULT_USER, None).unwrap();
        assert_eq!(issued.expires_in, 3600);

        let claims = tokens.verify(&issued.token).unwrap();
        assert_eq!(claims.user_id, DEFAULT_USER);
        assert_eq!(claims.session_id, issued.session_id);
        assert_eq!(claims.iss, ISSUER);
        assert_eq!(claims.exp - claims.iat, 3600);
    }

    #[test]
    fn test_refresh_keeps_session() {
        let tokens = service();
        let issued = tokens.issue(DEFAULT_USER, Some("session-1".to_string())).unwrap();
        assert_eq!(tokens.verify(&issued.token).unwrap().session_id, "session-1");
    }

    #[test]
    fn test_foreign_and_expired_tokens() {
        let tokens = service();
        let other = TokenService::new(&AuthConfig {
            jwt_secret: Some("another-secret".to_string()),
            ..AuthConfig::default()
        });
        let foreign = other.issue(DEFAULT_USER, None).unwrap();
        assert_eq!(tokens.verify(&foreign.token), Err(AuthError::Invalid));

        let past = Utc::now() - Duration::hours(2);
        let expired = Claims {
            user_id: DEFAULT_USER.to_string(),
            session_id: "s".to_string(),
            exp: (past + Duration::hours(1)).timestamp(),
            iat: past.timestamp(),
            iss: ISSUER.to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &expired,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(tokens.verify(&token), Err(AuthError::Expired));
    }

    #[test]
    fn test_wrong_issuer_is_rejected() {
        let now = Utc::now();
        let claims = Claims {
            user_id: DEFAULT_USER.to_string(),
            session_id: "s".to_string(),
            exp: (now + Duration::hours(1)).timestamp(),
            iat: now.timestamp(),
            iss: "someone-else".to_string(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(b"test-secret"),
        )
        .unwrap();
        assert_eq!(service().verify(&token), Err(AuthError::Invalid));
    }

    #[test]
    fn test_header_parsing() {
        let tokens = service();
        let issued = tokens.issue(DEFAULT_USER, None).unwrap();

        assert!(tokens.verify_header(Some(&format!("Bearer {}", issued.token))).is_ok());
        assert_eq!(tokens.verify_header(None), Err(AuthError::MissingHeader));
        assert_eq!(tokens.verify_header(Some("Basic abc")), Err(AuthError::MissingHeader));
        assert_eq!(tokens.verify_header(Some("Bearer ")), Err(AuthError::MissingHeader));
    }

    #[test]
    fn test_rate_limit_key() {
        let anonymous = Caller {
            claims: None,
            client_ip: "10.0.0.7".to_string(),
        };
        assert_eq!(anonymous.rate_limit_key(), "ip:10.0.0.7");

        let tokens = service();
        let issued = tokens.issue(DEFAULT_USER, Some("abc".to_string())).unwrap();
        let caller = Caller {
            claims: Some(tokens.verify(&issued.token).unwrap()),
            client_ip: "10.0.0.7".to_string(),
        };
        assert_eq!(caller.rate_limit_key(), "session:abc");
    }
}
