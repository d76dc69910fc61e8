use crate::auth::{Caller, IssuedToken, DEFAULT_USER};
use crate::error::AppResult;
use crate::state::AppState;
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

fn token_response(issued: IssuedToken) -> HttpResponse {
    HttpResponse::Ok().json(json!({
        "success": true,
        "token": issued.token,
        "token_type": "Bearer",
        "expires_in": issued.expires_in
    }))
}

/// Anonymous login: every browser session gets its own token.
pub async fn login(state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let issued = state.tokens.issue(DEFAULT_USER, None)?;
    info!(session_id = %issued.session_id, "Issued session token");
    Ok(token_response(issued))
}

/// New token for the same session, so the rate-limit history carries over.
pub async fn refresh(caller: Caller, state: web::Data<AppState>) -> AppResult<HttpResponse> {
    let issued = match caller.claims {
        Some(claims) => state.tokens.issue(&claims.user_id, Some(claims.session_id))?,
        None => state.tokens.issue(DEFAULT_USER, None)?,
    };
    info!(session_id = %issued.session_id, "Refreshed session token");
    Ok(token_response(issued))
}
