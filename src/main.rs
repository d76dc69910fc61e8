//! # Time Traveler Server - Main Application Entry Point
//!
//! Places outbound phone calls and connects each answered call to a
//! conversational voice agent that speaks as a person from the caller's
//! chosen year.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: shared application state and request metrics
//! - **handlers**: HTTP endpoints (call placement, TwiML, call status, auth)
//! - **websocket**: the media-stream socket Twilio opens for each call
//! - **session**: per-call state machine driving one media stream
//! - **telephony**: Twilio wire format, REST client and TwiML
//! - **conversation**: ElevenLabs conversation sessions and the fallback ladder
//! - **audio**: µ-law codec, resampling and per-call timing metrics
//! - **persona**: era rules, agent and voice selection
//! - **calls / rate_limit / auth**: call-status registry and request guards
//! - **speech**: locally synthesized apology when no agent session can start
//! - **middleware / health / error**: request logging, metrics, error bodies

mod audio;          // µ-law, resampling, frame timing
mod auth;           // JWT issue/verify and the Caller extractor
mod calls;          // Call-status registry and input validation
mod config;         // Configuration management
mod conversation;   // Conversation engine sessions
mod error;          // Error types and HTTP error responses
mod handlers;       // HTTP request handlers
mod health;         // Health and metrics endpoints
mod middleware;     // Request logging and metrics
mod persona;        // Era personas, agents, voices
mod rate_limit;     // Sliding-window call limiter
mod session;        // Per-call orchestration
mod speech;         // Fallback speech synthesis
mod state;          // Application state management
mod telephony;      // Twilio integration
mod websocket;      // Media stream socket

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use crate::config::{AppConfig, CorsConfig};
use crate::state::{AppState, Integrations};
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{error, info, warn};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Set once SIGTERM or SIGINT arrives.
static SHUTDOWN_SIGNAL: AtomicBool = AtomicBool::new(false);

#[actix_web::main]
async fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;
    config.validate_integrations()?;

    info!("Starting time-traveler-server v{}", env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded: {}:{}", config.server.host, config.server.port);
    match &config.server.public_host {
        Some(host) => info!("Twilio callbacks will use https://{}", host),
        None => info!("PUBLIC_HOST not set; callbacks will use the request Host header"),
    }
    if !config.auth.enabled {
        warn!("Authentication disabled; rate limits are keyed by client address");
    }

    let integrations = Integrations::from_config(&config, persona::catalog::process_env());
    let catalog_stats = integrations.catalog.stats();
    info!(
        agents = catalog_stats.agents,
        english_voices = catalog_stats.english_voices,
        spanish_voices = catalog_stats.spanish_voices,
        "Persona catalog loaded"
    );

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let cors_config = config.cors.clone();
    let app_state = web::Data::new(AppState::new(config, integrations));

    setup_signal_handlers();

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            // Last wrap is outermost: CORS sees requests first, metrics last
            .wrap(middleware::MetricsMiddleware)
            .wrap(middleware::RequestLogging)
            .wrap(TracingLogger::default())
            .wrap(build_cors(&cors_config))
            .configure(handlers::configure)
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        _ = wait_for_shutdown() => {
            info!("Shutdown signal received, stopping server...");
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

fn build_cors(config: &CorsConfig) -> Cors {
    config
        .allowed_origins
        .iter()
        .fold(Cors::default(), |cors, origin| cors.allowed_origin(origin))
        .allow_any_method()
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}

/// `RUST_LOG` wins; otherwise debug for this crate and info for actix.
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "time_traveler_server=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    Ok(())
}

fn setup_signal_handlers() {
    tokio::spawn(async {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut sigterm, mut sigint) = match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(term), Ok(int)) => (term, int),
            (Err(e), _) | (_, Err(e)) => {
                error!("Failed to install signal handlers: {}", e);
                return;
            }
        };

        tokio::select! {
            _ = sigterm.recv() => info!("Received SIGTERM"),
            _ = sigint.recv() => info!("Received SIGINT"),
        }

        SHUTDOWN_SIGNAL.store(true, Ordering::SeqCst);
    });
}

async fn wait_for_shutdown() {
    while !SHUTDOWN_SIGNAL.load(Ordering::SeqCst) {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;
    }
}
