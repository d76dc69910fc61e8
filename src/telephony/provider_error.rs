//! Maps Twilio REST error codes onto the caller-facing error taxonomy.
//!
//! The raw upstream message is for the log only; callers get the stable
//! `error_code`, a user-safe message and a suggestion.

use actix_web::http::StatusCode;
use serde::Deserialize;

/// Caller-facing description of a provider failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderFailure {
    pub provider_code: Option<u32>,
    pub error_code: &'static str,
    pub user_message: &'static str,
    pub suggestion: &'static str,
}

impl ProviderFailure {
    /// Problems with the dialled number are the caller's to fix; everything
    /// else is on our side of the provider.
    pub fn status_code(&self) -> StatusCode {
        match self.provider_code {
            Some(21211 | 21214 | 21614 | 21618 | 21619) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

const CHECK_COUNTRY_CODE: &str =
    "Please check that your number includes the country code (e.g., +1234567890).";
const TRY_LATER: &str = "Please try again later or contact support.";

pub fn map_provider_error(code: Option<u32>) -> ProviderFailure {
    let (error_code, user_message, suggestion) = match code {
        Some(20003) => (
            "AUTHENTICATION_FAILED",
            "Service authentication failed. Please try again later.",
            "Contact support if this persists.",
        ),
        Some(21211) => ("INVALID_PHONE_NUMBER", "Invalid phone number format.", CHECK_COUNTRY_CODE),
        Some(21214) => (
            "PHONE_NUMBER_NOT_REACHABLE",
            "Phone number is not reachable.",
            "Please verify the number is correct and try again.",
        ),
        Some(21610) => ("INVALID_FROM_NUMBER", "Service configuration error.", TRY_LATER),
        Some(21612) => ("PHONE_NUMBER_NOT_OWNED", "Service configuration error.", TRY_LATER),
        Some(21614) => (
            "PHONE_NUMBER_NOT_VERIFIED",
            "Phone number not verified for this service.",
            "Please try a different number or contact support.",
        ),
        Some(21617) => ("INVALID_CALLER_ID", "Invalid caller ID configuration.", TRY_LATER),
        Some(21618) => (
            "PHONE_NUMBER_BLOCKED",
            "Phone number is blocked.",
            "Please try a different number.",
        ),
        Some(21619) => ("INVALID_PHONE_NUMBER_FORMAT", "Invalid phone number format.", CHECK_COUNTRY_CODE),
        _ => (
            "TWILIO_ERROR",
            "Call service temporarily unavailable.",
            "Please try again in a few moments.",
        ),
    };

    ProviderFailure {
        provider_code: code,
        error_code,
        user_message,
        suggestion,
    }
}

/// Error body returned by the Twilio REST API.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TwilioErrorBody {
    #[serde(default)]
    pub code: Option<u32>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub more_info: Option<String>,
}
