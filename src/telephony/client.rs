//! # Outbound Call API
//!
//! [`TelephonyApi`] is the seam the HTTP handlers use to place and end calls;
//! [`TwilioClient`] implements it against the Twilio REST API with basic
//! auth and form-encoded bodies.

use super::provider_error::{map_provider_error, ProviderFailure, TwilioErrorBody};
use crate::config::TwilioConfig;
use futures_util::future::BoxFuture;
use serde::Deserialize;
use std::fmt;
use tracing::{info, warn};

/// Status events Twilio should report to the status callback.
const STATUS_CALLBACK_EVENTS: [&str; 4] = ["initiated", "ringing", "answered", "completed"];

#[derive(Debug, Clone, PartialEq)]
pub struct CallRequest {
    /// Destination in E.164 form
    pub to: String,
    /// Where Twilio fetches the call instructions
    pub twiml_url: String,
    /// Where Twilio reports call progress, if anywhere
    pub status_callback_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedCall {
    pub sid: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Final status requested when ending a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HangupStatus {
    /// End a call that is in progress.
    Completed,
    /// Cancel a call that is still queued or ringing.
    Canceled,
}

impl HangupStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HangupStatus::Completed => "completed",
            HangupStatus::Canceled => "canceled",
        }
    }
}

#[derive(Debug, Clone)]
pub enum TelephonyError {
    /// Credentials or caller-id number missing.
    NotConfigured(&'static str),
    /// Twilio answered with an error.
    Provider(ProviderFailure),
    /// Twilio could not be reached or answered with something unreadable.
    Network(String),
}

impl fmt::Display for TelephonyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TelephonyError::NotConfigured(what) => write!(f, "telephony not configured: {}", what),
            TelephonyError::Provider(failure) => write!(f, "telephony provider error: {}", failure.error_code),
            TelephonyError::Network(msg) => write!(f, "telephony request failed: {}", msg),
        }
    }
}

impl std::error::Error for TelephonyError {}

impl From<reqwest::Error> for TelephonyError {
    fn from(err: reqwest::Error) -> Self {
        TelephonyError::Network(err.to_string())
    }
}

pub trait TelephonyApi: Send + Sync {
    fn is_configured(&self) -> bool;

    fn create_call(&self, request: CallRequest) -> BoxFuture<'static, Result<CreatedCall, TelephonyError>>;

    fn hang_up(&self, call_sid: &str, status: HangupStatus) -> BoxFuture<'static, Result<(), TelephonyError>>;
}

#[derive(Clone)]
pub struct TwilioClient {
    http: reqwest::Client,
    account_sid: String,
    auth_token: String,
    from_number: String,
    api_base: String,
}

impl TwilioClient {
    pub fn new(config: &TwilioConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            account_sid: config.account_sid.clone(),
            auth_token: config.auth_token.clone(),
            from_number: config.phone_number.clone(),
            api_base: config.api_base.trim_end_matches('/').to_string(),
        }
    }

    fn calls_url(&self) -> String {
        format!("{}/2010-04-01/Accounts/{}/Calls.json", self.api_base, self.account_sid)
    }

    fn call_url(&self, call_sid: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/Calls/{}.json",
            self.api_base, self.account_sid, call_sid
        )
    }

    fn ensure_configured(&self) -> Result<(), TelephonyError> {
        if self.account_sid.is_empty() || self.auth_token.is_empty() {
            return Err(TelephonyError::NotConfigured("Twilio credentials"));
        }
        if self.from_number.is_empty() {
            return Err(TelephonyError::NotConfigured("Twilio phone number"));
        }
        Ok(())
    }

    async fn post_form(&self, url: String, form: &[(&str, String)]) -> Result<reqwest::Response, TelephonyError> {
        let response = self
            .http
            .post(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(form)
            .send()
            .await?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let body: TwilioErrorBody = response.json().await.unwrap_or_default();
        warn!(
            http_status = status.as_u16(),
            twilio_code = ?body.code,
            message = body.message.as_deref().unwrap_or(""),
            "Twilio request rejected"
        );
        Err(TelephonyError::Provider(map_provider_error(body.code)))
    }
}

impl TelephonyApi for TwilioClient {
    fn is_configured(&self) -> bool {
        self.ensure_configured().is_ok()
    }

    fn create_call(&self, request: CallRequest) -> BoxFuture<'static, Result<CreatedCall, TelephonyError>> {
        let client = self.clone();
        Box::pin(async move {
            client.ensure_configured()?;

            let mut form = vec![
                ("To", request.to.clone()),
                ("From", client.from_number.clone()),
                ("Url", request.twiml_url.clone()),
            ];
            if let Some(callback) = &request.status_callback_url {
                form.push(("StatusCallback", callback.clone()));
                form.push(("StatusCallbackMethod", "POST".to_string()));
                for event in STATUS_CALLBACK_EVENTS {
                    form.push(("StatusCallbackEvent", event.to_string()));
                }
            }

            let response = client.post_form(client.calls_url(), &form).await?;
            let call: CreatedCall = response.json().await?;
            info!(call_sid = %call.sid, status = ?call.status, "Outbound call created");
            Ok(call)
        })
    }

    fn hang_up(&self, call_sid: &str, status: HangupStatus) -> BoxFuture<'static, Result<(), TelephonyError>> {
        let client = self.clone();
        let call_sid = call_sid.to_string();
        Box::pin(async move {
            client.ensure_configured()?;
            let url = client.call_url(&call_sid);
            client
                .post_form(url, &[("Status", status.as_str().to_string())])
                .await?;
            info!(call_sid = %call_sid, status = status.as_str(), "Call ended at provider");
            Ok(())
        })
    }
}
