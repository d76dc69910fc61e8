//! # Error Handling
//!
//! [`AppError`] is what HTTP handlers return. Each variant maps to a status
//! code and a stable machine-readable `error_code`; the browser client
//! switches on that code, so the JSON body is flat:
//!
//! ```json
//! {
//!   "success": false,
//!   "error": "Phone number must have at least 10 digits",
//!   "error_code": "VALIDATION_ERROR",
//!   "suggestion": "Include the country code, e.g. +1234567890.",
//!   "timestamp": "2025-01-01T12:00:00Z"
//! }
//! ```
//!
//! Subsystems keep their own error enums (`ConversationError`,
//! `TelephonyError`, `SpeechError`, `ProtocolError`, `FrameError`) and only
//! the ones that can reach a handler convert into `AppError`.

use crate::calls::ValidationError;
use crate::rate_limit::RateLimitStatus;
use crate::telephony::{ProviderFailure, TelephonyError};
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use chrono::Utc;
use serde_json::json;
use std::fmt;

#[derive(Debug)]
pub enum AppError {
    /// Server-side problem (500)
    Internal(String),

    /// Malformed request (400)
    BadRequest(String),

    /// Unknown resource (404)
    NotFound(String),

    /// A required setting or credential is missing (500)
    ConfigError(String),

    /// Input failed a validation rule (400)
    Validation { message: String, hint: String },

    /// Missing, expired or invalid bearer token (401)
    Unauthorized(String),

    /// Caller exceeded the call rate limit (429)
    RateLimited(RateLimitStatus),

    /// The telephony provider refused a request (400 or 502)
    Telephony(ProviderFailure),
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "INTERNAL_ERROR",
            AppError::BadRequest(_) => "BAD_REQUEST",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::ConfigError(_) => "CONFIGURATION_ERROR",
            AppError::Validation { .. } => "VALIDATION_ERROR",
            AppError::Unauthorized(_) => "UNAUTHORIZED",
            AppError::RateLimited(_) => "RATE_LIMIT_EXCEEDED",
            AppError::Telephony(failure) => failure.error_code,
        }
    }

    fn message(&self) -> String {
        match self {
            AppError::Internal(_) => "Internal server error".to_string(),
            AppError::ConfigError(_) => "Service temporarily unavailable".to_string(),
            AppError::BadRequest(msg) | AppError::NotFound(msg) | AppError::Unauthorized(msg) => msg.clone(),
            AppError::Validation { message, .. } => message.clone(),
            AppError::RateLimited(status) => format!(
                "Too many calls. Limit: {} calls per {} minutes",
                status.limit, status.window_minutes
            ),
            AppError::Telephony(failure) => failure.user_message.to_string(),
        }
    }

    fn suggestion(&self) -> Option<String> {
        match self {
            AppError::Validation { hint, .. } => Some(hint.clone()),
            AppError::Telephony(failure) => Some(failure.suggestion.to_string()),
            AppError::RateLimited(_) => Some("Please wait before placing another call.".to_string()),
            AppError::Internal(_) | AppError::ConfigError(_) => {
                Some("Please try again in a few minutes.".to_string())
            }
            _ => None,
        }
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::BadRequest(msg) => write!(f, "Bad request: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Validation { message, .. } => write!(f, "Validation error: {}", message),
            AppError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            AppError::RateLimited(status) => write!(f, "Rate limited: {} calls in window", status.current_count),
            AppError::Telephony(failure) => write!(f, "Telephony error: {}", failure.error_code),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::BadRequest(_) | AppError::Validation { .. } => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Telephony(failure) => failure.status_code(),
        }
    }

    fn error_response(&self) -> HttpResponse {
        let now = Utc::now();
        let mut body = json!({
            "success": false,
            "error": self.message(),
            "error_code": self.error_code(),
            "timestamp": now.to_rfc3339(),
        });
        if let Some(suggestion) = self.suggestion() {
            body["suggestion"] = json!(suggestion);
        }

        let mut response = HttpResponse::build(self.status_code());
        if let AppError::RateLimited(status) = self {
            body["remaining"] = json!(status.remaining);
            body["reset_time"] = json!(status.reset_time.to_rfc3339());
            body["current_count"] = json!(status.current_count);
            body["limit"] = json!(status.limit);
            body["window_minutes"] = json!(status.window_minutes);
            response.insert_header(("Retry-After", status.retry_after_secs(now).to_string()));
        }
        if let AppError::Unauthorized(_) = self {
            response.insert_header(("WWW-Authenticate", "Bearer"));
        }

        response.json(body)
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

impl From<ValidationError> for AppError {
    fn from(err: ValidationError) -> Self {
        AppError::Validation {
            message: err.message,
            hint: err.hint.to_string(),
        }
    }
}

impl From<TelephonyError> for AppError {
    fn from(err: TelephonyError) -> Self {
        match err {
            TelephonyError::NotConfigured(what) => AppError::ConfigError(format!("{} not configured", what)),
            TelephonyError::Provider(failure) => AppError::Telephony(failure),
            TelephonyError::Network(msg) => AppError::Internal(msg),
        }
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telephony::provider_error::map_provider_error;
    use actix_web::body::to_bytes;
    use actix_web::http::header::HeaderMap;

    async fn body_of(err: AppError) -> (StatusCode, serde_json::Value, HeaderMap) {
        let response = err.error_response();
        let status = response.status();
        let headers = response.headers().clone();
        let bytes = to_bytes(response.into_body()).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap(), headers)
    }

    #[actix_web::test]
    async fn test_validation_body_is_flat() {
        let err = AppError::from(ValidationError {
            field: "to",
            message: "Phone number must have at least 10 digits".to_string(),
            hint: "Include the country code, e.g. +1234567890.",
        });
        let (status, body, _) = body_of(err).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["success"], false);
        assert_eq!(body["error_code"], "VALIDATION_ERROR");
        assert_eq!(body["error"], "Phone number must have at least 10 digits");
        assert!(body["suggestion"].as_str().unwrap().contains("country code"));
    }

    #[actix_web::test]
    async fn test_provider_failure_status() {
        let (status, body, _) = body_of(AppError::Telephony(map_provider_error(Some(21211)))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error_code"], "INVALID_PHONE_NUMBER");

        let (status, body, _) = body_of(AppError::Telephony(map_provider_error(Some(20003)))).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error_code"], "AUTHENTICATION_FAILED");
    }

    #[actix_web::test]
    async fn test_rate_limited_has_retry_after() {
        let status = RateLimitStatus {
            limit: 5,
            window_minutes: 5,
            current_count: 5,
            remaining: 0,
            reset_time: Utc::now() + chrono::Duration::seconds(120),
            can_make_call: false,
        };
        let (code, body, headers) = body_of(AppError::RateLimited(status)).await;
        assert_eq!(code, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error_code"], "RATE_LIMIT_EXCEEDED");
        assert_eq!(body["remaining"], 0);
        assert!(headers.contains_key("retry-after"));
    }

    #[test]
    fn test_internal_details_are_not_exposed() {
        let err = AppError::from(anyhow::anyhow!("db password is hunter2"));
        assert_eq!(err.message(), "Internal server error");
        assert!(err.to_string().contains("hunter2"));
    }
}
