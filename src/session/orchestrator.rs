//! Drives one call: opens the conversation session when the stream starts,
//! feeds it the stream's events, and tears everything down exactly once.
//!
//! Teardown order matters. The engine session is ended and waited on first,
//! so its driver thread has stopped calling `output` before the bridge is
//! released. Only then are the stream's metrics final.

use super::{InboundFrame, SessionPhase};
use crate::audio::StreamMetrics;
use crate::calls::CallRegistry;
use crate::conversation::{establish_session, AttemptKind, AudioInterface, ConversationEngine, EstablishedSession, SessionPlan};
use crate::persona::PersonaCatalog;
use crate::speech::{self, SpeechSynthesizer};
use crate::state::AppState;
use crate::telephony::protocol::{parse_message, StartMetadata};
use crate::telephony::{DispatchOutcome, StreamEvent, TelephonyBridge};
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const DEFAULT_LANGUAGE: &str = "en";
const DEFAULT_YEAR: i32 = 2024;
const RAW_LOG_LIMIT: usize = 200;

/// Shared services a session needs.
#[derive(Clone)]
pub struct SessionContext {
    pub engine: Arc<dyn ConversationEngine>,
    pub catalog: Arc<PersonaCatalog>,
    pub speech: Arc<dyn SpeechSynthesizer>,
    pub calls: Arc<CallRegistry>,
    pub debug_logs: bool,
}

impl SessionContext {
    pub fn from_state(state: &AppState) -> Self {
        Self {
            engine: state.engine.clone(),
            catalog: state.catalog.clone(),
            speech: state.speech.clone(),
            calls: state.calls.clone(),
            debug_logs: state.config.logging.debug_logs,
        }
    }
}

/// How a session went, for logging and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub call_sid: Option<String>,
    pub attempt: Option<AttemptKind>,
    pub apologized: bool,
    pub metrics: StreamMetrics,
}

pub struct SessionOrchestrator {
    context: SessionContext,
    bridge: Arc<TelephonyBridge>,
    phase: SessionPhase,
    session: Option<EstablishedSession>,
    call_sid: Option<String>,
    attempt: Option<AttemptKind>,
    apologized: bool,
    metrics: StreamMetrics,
}

impl SessionOrchestrator {
    pub fn new(context: SessionContext, bridge: Arc<TelephonyBridge>) -> Self {
        Self {
            context,
            bridge,
            phase: SessionPhase::AwaitingStart,
            session: None,
            call_sid: None,
            attempt: None,
            apologized: false,
            metrics: StreamMetrics::default(),
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    /// Consume inbound frames until the session ends, then clean up.
    pub async fn run(mut self, mut inbound: mpsc::UnboundedReceiver<InboundFrame>) -> SessionSummary {
        while let Some(frame) = inbound.recv().await {
            let flow = match frame {
                InboundFrame::Text(text) => self.handle_text(&text).await,
                InboundFrame::Closed => {
                    debug!(call_sid = ?self.call_sid, "Connection closed");
                    ControlFlow::Break(())
                }
            };
            if flow.is_break() {
                break;
            }
        }

        self.terminate("connection finished").await;
        self.summary()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            call_sid: self.call_sid.clone(),
            attempt: self.attempt,
            apologized: self.apologized,
            metrics: self.metrics.clone(),
        }
    }

    async fn handle_text(&mut self, text: &str) -> ControlFlow<()> {
        if self.context.debug_logs {
            let preview: String = text.chars().take(RAW_LOG_LIMIT).collect();
            debug!(message = %preview, "Inbound stream message");
        }

        match parse_message(text) {
            Ok(Some(event)) => self.handle_event(event).await,
            Ok(None) => ControlFlow::Continue(()),
            Err(e) if e.is_fatal() => {
                warn!(call_sid = ?self.call_sid, error = %e, "Protocol error, ending session");
                self.terminate("protocol error").await;
                ControlFlow::Break(())
            }
            Err(e) => {
                warn!(call_sid = ?self.call_sid, error = %e, "Skipping unusable frame");
                ControlFlow::Continue(())
            }
        }
    }

    /// Apply one protocol event.
    pub async fn handle_event(&mut self, event: StreamEvent) -> ControlFlow<()> {
        if matches!(self.phase, SessionPhase::Ending | SessionPhase::Terminated) {
            return ControlFlow::Break(());
        }

        let outcome = self.bridge.dispatch(&event);
        match (outcome, event) {
            (DispatchOutcome::Started, StreamEvent::Start { start }) => self.on_stream_started(&start).await,
            (DispatchOutcome::StopRequested, _) => {
                self.terminate("stop event").await;
                ControlFlow::Break(())
            }
            _ => ControlFlow::Continue(()),
        }
    }

    async fn on_stream_started(&mut self, start: &StartMetadata) -> ControlFlow<()> {
        if self.phase == SessionPhase::Active {
            warn!(stream_sid = %start.stream_sid, "Repeated start event, keeping the current session");
            return ControlFlow::Continue(());
        }

        if !start.call_sid.is_empty() {
            self.context.calls.stream_started(&start.call_sid, &start.stream_sid);
            self.call_sid = Some(start.call_sid.clone());
        }

        let lang = start
            .parameter("lang")
            .filter(|lang| crate::calls::validation::validate_language(lang).is_ok())
            .unwrap_or(DEFAULT_LANGUAGE)
            .to_string();
        let year = start
            .parameter("year")
            .and_then(|year| year.trim().parse::<i32>().ok())
            .unwrap_or(DEFAULT_YEAR);

        let persona = self.context.catalog.select(year, &lang);
        info!(
            call_sid = %start.call_sid,
            lang = %lang,
            year,
            era = %persona.variables.era_name,
            agent_id = %persona.agent_id,
            voice = persona.voice.as_ref().map(|voice| voice.name.as_str()).unwrap_or("agent default"),
            "Opening conversation session"
        );

        let plan = SessionPlan::for_persona(&persona);
        let audio: Arc<dyn AudioInterface> = self.bridge.clone();
        match establish_session(self.context.engine.as_ref(), &plan, audio).await {
            Ok(established) => {
                self.attempt = Some(established.kind);
                self.session = Some(established);
                self.phase = SessionPhase::Active;
                ControlFlow::Continue(())
            }
            Err(exhausted) => {
                error!(call_sid = %start.call_sid, error = %exhausted, "No conversation session could be opened");
                self.apologize(&lang).await;
                self.terminate("session attempts exhausted").await;
                ControlFlow::Break(())
            }
        }
    }

    /// Play the locally synthesized apology and give it time to be heard.
    async fn apologize(&mut self, lang: &str) {
        let frames = match speech::apology_frames(self.context.speech.as_ref(), lang).await {
            Some(frames) => frames,
            None => return,
        };

        let playout = Duration::from_millis(20 * frames.len() as u64);
        for frame in frames {
            self.bridge.output(frame);
        }
        self.apologized = true;
        tokio::time::sleep(playout).await;
    }

    /// End the engine session, wait for it, release the bridge and record the
    /// stream's metrics. Runs once; later calls do nothing.
    pub async fn terminate(&mut self, reason: &str) {
        if matches!(self.phase, SessionPhase::Ending | SessionPhase::Terminated) {
            return;
        }
        debug!(call_sid = ?self.call_sid, reason, from = self.phase.as_str(), "Ending session");
        self.phase = SessionPhase::Ending;

        if let Some(established) = self.session.take() {
            let mut session = established.session;
            session.end_session();
            let conversation_id = session.wait_for_session_end().await;
            info!(call_sid = ?self.call_sid, conversation_id = ?conversation_id, "Conversation session ended");
        }

        self.bridge.stop();
        self.bridge.hang_up();

        self.metrics = self.bridge.metrics();
        info!(
            call_sid = ?self.call_sid,
            reason,
            first_out_ms = ?self.metrics.first_out_ms,
            avg_out_interval_ms = ?self.metrics.avg_out_interval_ms,
            p95_out_interval_ms = ?self.metrics.p95_out_interval_ms,
            min_round_trip_ms = ?self.metrics.min_round_trip_ms,
            outputs_sent = self.metrics.outputs_sent,
            "Stream metrics"
        );

        if let Some(call_sid) = &self.call_sid {
            self.context.calls.stream_ended(call_sid, self.metrics.clone());
        }

        self.phase = SessionPhase::Terminated;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calls::CallState;
    use crate::config::{CatalogConfig, LoggingConfig};
    use crate::conversation::attempts::testing::ScriptedEngine;
    use crate::persona::EnvLookup;
    use crate::speech::testing::FakeSynthesizer;
    use crate::telephony::OutboundFrame;
    use base64::engine::general_purpose::STANDARD as B64;
    use base64::Engine as _;
    use serde_json::json;

    struct Harness {
        orchestrator: SessionOrchestrator,
        engine: Arc<ScriptedEngine>,
        speech: Arc<FakeSynthesizer>,
        calls: Arc<CallRegistry>,
        outbound: mpsc::UnboundedReceiver<OutboundFrame>,
    }

    fn harness(engine: ScriptedEngine, speech: FakeSynthesizer) -> Harness {
        let engine = Arc::new(engine);
        let speech = Arc::new(speech);
        let calls = Arc::new(CallRegistry::new());
        let env: EnvLookup = Arc::new(|_: &str| None);

        let context = SessionContext {
            engine: engine.clone(),
            catalog: Arc::new(PersonaCatalog::load(&CatalogConfig::default(), "base-agent", env)),
            speech: speech.clone(),
            calls: calls.clone(),
            debug_logs: true,
        };
        let (tx, outbound) = mpsc::unbounded_channel();
        let bridge = Arc::new(TelephonyBridge::new(tx, &LoggingConfig::default()));

        Harness {
            orchestrator: SessionOrchestrator::new(context, bridge),
            engine,
            speech,
            calls,
            outbound,
        }
    }

    fn start_frame(lang: &str) -> String {
        json!({
            "event": "start",
            "start": {
                "streamSid": "MZ1",
                "callSid": "CA1",
                "customParameters": {"lang": lang, "year": "1850"}
            }
        })
        .to_string()
    }

    fn media_frame() -> String {
        json!({"event": "media", "media": {"payload": B64.encode([0xFFu8; 160])}}).to_string()
    }

    fn stop_frame() -> String {
        json!({"event": "stop"}).to_string()
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<OutboundFrame>) -> Vec<OutboundFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    async fn feed(orchestrator: SessionOrchestrator, frames: Vec<InboundFrame>) -> SessionSummary {
        let (tx, rx) = mpsc::unbounded_channel();
        for frame in frames {
            tx.send(frame).unwrap();
        }
        drop(tx);
        orchestrator.run(rx).await
    }

    #[tokio::test]
    async fn test_start_media_stop() {
        let mut h = harness(ScriptedEngine::failing(0), FakeSynthesizer::default());
        h.calls.insert_initiated("CA1", "+15551234567", "en", 1850);

        let mut frames = vec![InboundFrame::Text(start_frame("en"))];
        frames.extend((0..5).map(|_| InboundFrame::Text(media_frame())));
        frames.push(InboundFrame::Text(stop_frame()));
        frames.push(InboundFrame::Text(stop_frame()));
        frames.push(InboundFrame::Closed);

        let summary = feed(h.orchestrator, frames).await;

        assert_eq!(summary.call_sid.as_deref(), Some("CA1"));
        assert_eq!(summary.attempt, Some(AttemptKind::Full));
        assert!(!summary.apologized);
        assert_eq!(h.engine.attempts_made(), 1);
        assert_eq!(*h.engine.ended.lock().unwrap(), 1);
        assert_eq!(*h.engine.waited.lock().unwrap(), 1);

        let record = h.calls.get("CA1").unwrap();
        assert_eq!(record.status, CallState::Ended);
        assert!(!record.websocket_connected);
        assert_eq!(record.stream_id.as_deref(), Some("MZ1"));
        assert!(record.metrics.is_some());

        assert_eq!(drain(&mut h.outbound), vec![OutboundFrame::Hangup]);
    }

    #[tokio::test]
    async fn test_cleanup_runs_once() {
        let mut h = harness(ScriptedEngine::failing(0), FakeSynthesizer::default());
        let orchestrator = &mut h.orchestrator;

        let start = parse_message(&start_frame("en")).unwrap().unwrap();
        assert!(orchestrator.handle_event(start).await.is_continue());
        assert_eq!(orchestrator.phase(), SessionPhase::Active);

        let stop = parse_message(&stop_frame()).unwrap().unwrap();
        assert!(orchestrator.handle_event(stop.clone()).await.is_break());
        assert!(orchestrator.handle_event(stop).await.is_break());
        orchestrator.terminate("connection closed").await;

        assert_eq!(orchestrator.phase(), SessionPhase::Terminated);
        assert_eq!(*h.engine.ended.lock().unwrap(), 1);
        assert_eq!(*h.engine.waited.lock().unwrap(), 1);
        assert_eq!(drain(&mut h.outbound), vec![OutboundFrame::Hangup]);
    }

    #[tokio::test]
    async fn test_rejected_configuration_falls_back() {
        let h = harness(ScriptedEngine::failing(1), FakeSynthesizer::default());
        let summary = feed(
            h.orchestrator,
            vec![InboundFrame::Text(start_frame("es")), InboundFrame::Closed],
        )
        .await;

        assert_eq!(summary.attempt, Some(AttemptKind::VariablesOnly));
        assert_eq!(h.engine.attempts_made(), 2);
        assert!(h.speech.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_all_attempts_failing_plays_apology_and_hangs_up() {
        let mut h = harness(ScriptedEngine::failing(3), FakeSynthesizer::default());
        let summary = feed(
            h.orchestrator,
            vec![
                InboundFrame::Text(start_frame("es")),
                InboundFrame::Text(media_frame()),
            ],
        )
        .await;

        assert_eq!(summary.attempt, None);
        assert!(summary.apologized);
        assert_eq!(h.engine.attempts_made(), 3);
        assert_eq!(h.speech.requests.lock().unwrap()[0].1, "es");

        let frames = drain(&mut h.outbound);
        let (hangup, media) = frames.split_last().unwrap();
        assert_eq!(*hangup, OutboundFrame::Hangup);
        assert_eq!(media.len(), 5);
        for frame in media {
            match frame {
                OutboundFrame::Text(text) => {
                    let value: serde_json::Value = serde_json::from_str(text).unwrap();
                    assert_eq!(value["event"], "media");
                    assert_eq!(value["streamSid"], "MZ1");
                }
                other => panic!("unexpected frame {:?}", other),
            }
        }

        assert_eq!(h.calls.get("CA1").unwrap().status, CallState::Ended);
        assert_eq!(summary.metrics.outputs_sent, 5);
    }

    #[tokio::test]
    async fn test_failed_synthesis_still_hangs_up() {
        let mut h = harness(
            ScriptedEngine::failing(3),
            FakeSynthesizer {
                fail: true,
                ..FakeSynthesizer::default()
            },
        );
        let summary = feed(h.orchestrator, vec![InboundFrame::Text(start_frame("en"))]).await;

        assert!(!summary.apologized);
        assert_eq!(drain(&mut h.outbound), vec![OutboundFrame::Hangup]);
    }

    #[tokio::test]
    async fn test_close_before_start() {
        let h = harness(ScriptedEngine::failing(0), FakeSynthesizer::default());
        let summary = feed(
            h.orchestrator,
            vec![
                InboundFrame::Text(json!({"event": "connected"}).to_string()),
                InboundFrame::Text(media_frame()),
                InboundFrame::Closed,
            ],
        )
        .await;

        assert_eq!(summary.call_sid, None);
        assert_eq!(h.engine.attempts_made(), 0);
        assert_eq!(h.calls.len(), 0);
    }

    #[tokio::test]
    async fn test_malformed_message_ends_session() {
        let h = harness(ScriptedEngine::failing(0), FakeSynthesizer::default());
        let summary = feed(
            h.orchestrator,
            vec![
                InboundFrame::Text(start_frame("en")),
                InboundFrame::Text("this is not json".to_string()),
                InboundFrame::Text(media_frame()),
            ],
        )
        .await;

        assert_eq!(summary.attempt, Some(AttemptKind::Full));
        assert_eq!(*h.engine.ended.lock().unwrap(), 1);
        assert_eq!(h.calls.get("CA1").unwrap().status, CallState::Ended);
    }

    #[tokio::test]
    async fn test_bad_media_frame_is_skipped() {
        let h = harness(ScriptedEngine::failing(0), FakeSynthesizer::default());
        let summary = feed(
            h.orchestrator,
            vec![
                InboundFrame::Text(start_frame("en")),
                InboundFrame::Text(json!({"event": "media", "media": {}}).to_string()),
                InboundFrame::Text(media_frame()),
                InboundFrame::Text(stop_frame()),
            ],
        )
        .await;

        assert_eq!(summary.attempt, Some(AttemptKind::Full));
        assert_eq!(*h.engine.ended.lock().unwrap(), 1);
    }
}
