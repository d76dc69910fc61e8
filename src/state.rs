//! # Application State
//!
//! Everything the HTTP handlers and media-stream connections share. Actix
//! clones `web::Data<AppState>` into every worker, so each field is an `Arc`
//! and cloning the state is cheap.
//!
//! ## Contents:
//! - **config**: read-only after startup
//! - **metrics**: request/error counters and per-endpoint timings, behind a
//!   `RwLock` because every request writes to it
//! - **calls**: the call status registry (has its own finer-grained locking)
//! - **rate_limiter / tokens**: the guards on `/outbound-call`
//! - **telephony / engine / speech / catalog**: external collaborators behind
//!   traits, so tests can swap in fakes

use crate::auth::TokenService;
use crate::calls::CallRegistry;
use crate::config::AppConfig;
use crate::conversation::elevenlabs::ElevenLabsEngine;
use crate::conversation::ConversationEngine;
use crate::persona::{EnvLookup, PersonaCatalog};
use crate::rate_limit::RateLimiter;
use crate::speech::{EspeakSynthesizer, SpeechSynthesizer};
use crate::telephony::{TelephonyApi, TwilioClient};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started, for uptime
    pub start_time: Instant,

    pub calls: Arc<CallRegistry>,

    pub rate_limiter: Arc<RateLimiter>,

    pub tokens: Arc<TokenService>,

    pub telephony: Arc<dyn TelephonyApi>,

    pub engine: Arc<dyn ConversationEngine>,

    pub speech: Arc<dyn SpeechSynthesizer>,

    pub catalog: Arc<PersonaCatalog>,
}

/// The external collaborators, grouped so tests can build a state around
/// fakes.
pub struct Integrations {
    pub telephony: Arc<dyn TelephonyApi>,
    pub engine: Arc<dyn ConversationEngine>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub catalog: Arc<PersonaCatalog>,
}

impl Integrations {
    /// The production clients, configured from `config`.
    pub fn from_config(config: &AppConfig, env: EnvLookup) -> Self {
        Self {
            telephony: Arc::new(TwilioClient::new(&config.twilio)),
            engine: Arc::new(ElevenLabsEngine::new(&config.elevenlabs)),
            speech: Arc::new(EspeakSynthesizer::new(&config.speech)),
            catalog: Arc::new(PersonaCatalog::load(
                &config.catalog,
                config.elevenlabs.agent_id.clone(),
                env,
            )),
        }
    }
}

#[derive(Debug, Default)]
pub struct AppMetrics {
    pub request_count: u64,

    pub error_count: u64,

    /// Media-stream websockets currently open
    pub active_sessions: u32,

    /// Keyed by "METHOD /route/{pattern}"
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,

    pub total_duration_ms: u64,

    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, integrations: Integrations) -> Self {
        let rate_limiter = RateLimiter::new(&config.rate_limit);
        let tokens = TokenService::new(&config.auth);

        Self {
            config: Arc::new(config),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            calls: Arc::new(CallRegistry::new()),
            rate_limiter: Arc::new(rate_limiter),
            tokens: Arc::new(tokens),
            telephony: integrations.telephony,
            engine: integrations.engine,
            speech: integrations.speech,
            catalog: integrations.catalog,
        }
    }

    pub fn increment_request_count(&self) {
        self.write_metrics().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.write_metrics().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.write_metrics();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    pub fn increment_active_sessions(&self) {
        self.write_metrics().active_sessions += 1;
    }

    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.write_metrics();
        metrics.active_sessions = metrics.active_sessions.saturating_sub(1);
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap_or_else(PoisonError::into_inner);
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    fn write_metrics(&self) -> std::sync::RwLockWriteGuard<'_, AppMetrics> {
        self.metrics.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! A state wired to in-memory fakes.

    use super::*;
    use crate::conversation::attempts::testing::ScriptedEngine;
    use crate::speech::testing::FakeSynthesizer;
    use crate::telephony::client::testing::FakeTelephony;

    pub struct TestState {
        pub state: AppState,
        pub telephony: Arc<FakeTelephony>,
        pub engine: Arc<ScriptedEngine>,
        pub speech: Arc<FakeSynthesizer>,
    }

    pub fn test_state(config: AppConfig) -> TestState {
        test_state_with(config, FakeTelephony::default(), ScriptedEngine::failing(0))
    }

    pub fn test_state_with(config: AppConfig, telephony: FakeTelephony, engine: ScriptedEngine) -> TestState {
        let telephony = Arc::new(telephony);
        let engine = Arc::new(engine);
        let speech = Arc::new(FakeSynthesizer::default());
        let env: EnvLookup = Arc::new(|_: &str| None);
        let catalog = Arc::new(PersonaCatalog::load(&config.catalog, "base-agent", env));

        let state = AppState::new(
            config,
            Integrations {
                telephony: telephony.clone(),
                engine: engine.clone(),
                speech: speech.clone(),
                catalog,
            },
        );

        TestState {
            state,
            telephony,
            engine,
            speech,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::test_state;
    use super::*;

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state(AppConfig::default()).state;
        state.record_endpoint_request("GET /health", 10, false);
        state.record_endpoint_request("GET /health", 30, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["GET /health"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 20.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_active_sessions_never_underflow() {
        let state = test_state(AppConfig::default()).state;
        state.decrement_active_sessions();
        state.increment_active_sessions();
        state.increment_active_sessions();
        state.decrement_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 1);
    }
}
