pub mod auth;
pub mod calls;

use crate::health;
use crate::telephony::twiml::MEDIA_STREAM_PATH;
use crate::websocket;
use actix_web::{web, HttpResponse};
use serde_json::json;

/// Every route the server exposes. Shared by `main` and the handler tests.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.route("/", web::get().to(banner))
        .route("/health", web::get().to(health::health_check))
        .route("/metrics", web::get().to(health::detailed_metrics))
        .route("/auth/login", web::post().to(auth::login))
        .route("/auth/refresh", web::post().to(auth::refresh))
        .route("/outbound-call", web::post().to(calls::outbound_call))
        .route("/outbound-call-twiml", web::get().to(calls::outbound_call_twiml))
        .route("/outbound-call-twiml", web::post().to(calls::outbound_call_twiml_form))
        .route("/call-status-callback", web::post().to(calls::call_status_callback))
        .route("/call-status/{call_sid}", web::get().to(calls::call_status))
        .route("/end-call/{call_sid}", web::post().to(calls::end_call))
        .route("/rate-limit-status", web::get().to(calls::rate_limit_status))
        .route(MEDIA_STREAM_PATH, web::get().to(websocket::media_stream));
}

pub async fn banner() -> HttpResponse {
    HttpResponse::Ok().json(json!({ "message": "Twilio-ElevenLabs Integration Server" }))
}
