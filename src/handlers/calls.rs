//! Outbound call endpoints and the Twilio webhooks that follow a call.

use crate::auth::Caller;
use crate::calls::validation::{validate_language, validate_year};
use crate::calls::{validate_outbound_call, CallState};
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::telephony::{twiml, CallRequest, HangupStatus};
use actix_web::{web, HttpRequest, HttpResponse};
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

const DEFAULT_LANG: &str = "en";
const DEFAULT_YEAR: i32 = 2024;

fn default_lang() -> String {
    DEFAULT_LANG.to_string()
}

fn default_year() -> i32 {
    DEFAULT_YEAR
}

#[derive(Debug, Deserialize)]
pub struct OutboundCallBody {
    pub to: String,
    #[serde(default = "default_lang")]
    pub lang: String,
    #[serde(default = "default_year")]
    pub year: i32,
}

/// Query string of the TwiML webhook. Twilio appends `CallSid` on GET.
#[derive(Debug, Default, Deserialize)]
pub struct TwimlQuery {
    pub lang: Option<String>,
    pub year: Option<String>,
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
}

/// The fields we use from Twilio's webhook form bodies.
#[derive(Debug, Default, Deserialize)]
pub struct TwilioCallForm {
    #[serde(rename = "CallSid")]
    pub call_sid: Option<String>,
    #[serde(rename = "CallStatus")]
    pub call_status: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EndCallQuery {
    pub reason: Option<String>,
}

/// Host Twilio should call back on: the configured public host, or whatever
/// host this request arrived on.
fn public_host(req: &HttpRequest, state: &AppState) -> String {
    match state.config.server.public_host.as_deref().filter(|h| !h.is_empty()) {
        Some(host) => host.to_string(),
        None => req.connection_info().host().to_string(),
    }
}

pub async fn outbound_call(
    req: HttpRequest,
    caller: Caller,
    state: web::Data<AppState>,
    body: web::Json<OutboundCallBody>,
) -> AppResult<HttpResponse> {
    let params = validate_outbound_call(&body.to, &body.lang, body.year)?;

    if !state.telephony.is_configured() {
        return Err(AppError::ConfigError("Twilio credentials not configured".to_string()));
    }

    let key = caller.rate_limit_key();
    let quota = state
        .rate_limiter
        .check(&key)
        .map_err(|status| {
            warn!(key = %key, current = status.current_count, "Outbound call rate limited");
            AppError::RateLimited(status)
        })?;

    let host = public_host(&req, &state);
    let request = CallRequest {
        to: params.to.clone(),
        twiml_url: format!(
            "https://{}/outbound-call-twiml?lang={}&year={}",
            host, params.lang, params.year
        ),
        status_callback_url: Some(format!("https://{}/call-status-callback", host)),
    };

    let call = state.telephony.create_call(request).await?;
    state
        .calls
        .insert_initiated(&call.sid, &params.to, params.lang, params.year);

    info!(call_sid = %call.sid, lang = params.lang, year = params.year, "Call initiated");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "message": "Call initiated",
        "callSid": call.sid,
        "parameters": {
            "to": params.to,
            "lang": params.lang,
            "year": params.year
        },
        "rate_limit": {
            "remaining": quota.remaining,
            "reset_time": quota.reset_time.to_rfc3339()
        }
    })))
}

fn twiml_response(
    req: &HttpRequest,
    state: &AppState,
    query: &TwimlQuery,
    call_sid: Option<&str>,
) -> HttpResponse {
    let lang = query
        .lang
        .as_deref()
        .map(|lang| {
            validate_language(lang).unwrap_or_else(|_| {
                warn!(lang, "Unsupported language in TwiML request, using default");
                DEFAULT_LANG
            })
        })
        .unwrap_or(DEFAULT_LANG);

    let year = query
        .year
        .as_deref()
        .and_then(|year| year.trim().parse::<i32>().ok())
        .and_then(|year| validate_year(year).ok())
        .unwrap_or(DEFAULT_YEAR);

    if let Some(call_sid) = call_sid {
        if state.calls.mark_twiml_requested(call_sid).is_none() {
            debug!(call_sid, "TwiML requested for a call we did not place");
        }
    }

    let host = public_host(req, state);
    debug!(host = %host, lang, year, "Serving stream TwiML");

    HttpResponse::Ok()
        .content_type("application/xml")
        .body(twiml::connect_stream(&host, lang, year))
}

pub async fn outbound_call_twiml(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<TwimlQuery>,
) -> HttpResponse {
    twiml_response(&req, &state, &query, query.call_sid.as_deref())
}

/// Twilio's default webhook method: same document, `CallSid` in the form body.
pub async fn outbound_call_twiml_form(
    req: HttpRequest,
    state: web::Data<AppState>,
    query: web::Query<TwimlQuery>,
    form: Option<web::Form<TwilioCallForm>>,
) -> HttpResponse {
    let call_sid = form
        .as_ref()
        .and_then(|form| form.call_sid.clone())
        .or_else(|| query.call_sid.clone());
    twiml_response(&req, &state, &query, call_sid.as_deref())
}

pub async fn call_status_callback(
    state: web::Data<AppState>,
    form: web::Form<TwilioCallForm>,
) -> HttpResponse {
    match (form.call_sid.as_deref(), form.call_status.as_deref()) {
        (Some(call_sid), Some(status)) => match state.calls.apply_provider_status(call_sid, status) {
            Some(record) => {
                info!(call_sid, provider_status = status, status = record.status.as_str(), "Call status update");
            }
            None => debug!(call_sid, provider_status = status, "Status update not applied"),
        },
        _ => warn!("Status callback without CallSid or CallStatus"),
    }
    HttpResponse::NoContent().finish()
}

pub async fn call_status(
    _caller: Caller,
    state: web::Data<AppState>,
    path: web::Path<String>,
) -> AppResult<HttpResponse> {
    let call_sid = path.into_inner();
    let record = state
        .calls
        .get(&call_sid)
        .ok_or_else(|| AppError::NotFound(format!("Call {} not found", call_sid)))?;

    let mut body = serde_json::to_value(&record)?;
    body["success"] = json!(true);
    Ok(HttpResponse::Ok().json(body))
}

pub async fn end_call(
    _caller: Caller,
    state: web::Data<AppState>,
    path: web::Path<String>,
    query: web::Query<EndCallQuery>,
) -> AppResult<HttpResponse> {
    let call_sid = path.into_inner();
    let reason = query.reason.as_deref().filter(|r| !r.is_empty());

    let record = state
        .calls
        .end_call(&call_sid, reason)
        .ok_or_else(|| AppError::NotFound(format!("Call {} not found", call_sid)))?;

    let hangup = if record.status == CallState::Failed {
        HangupStatus::Canceled
    } else {
        HangupStatus::Completed
    };
    if let Err(err) = state.telephony.hang_up(&call_sid, hangup).await {
        warn!(call_sid = %call_sid, error = %err, "Provider hang-up failed; call marked ended locally");
    }

    info!(call_sid = %call_sid, status = record.status.as_str(), reason = ?record.end_reason, "Call ended on request");

    Ok(HttpResponse::Ok().json(json!({
        "success": true,
        "callSid": call_sid,
        "status": record.status,
        "reason": record.end_reason
    })))
}

pub async fn rate_limit_status(caller: Caller, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let status = state.rate_limiter.status(&caller.rate_limit_key());
    let mut body = serde_json::to_value(&status)?;
    body["success"] = json!(true);
    Ok(HttpResponse::Ok().json(body))
}
