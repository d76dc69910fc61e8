//! # ElevenLabs Conversational AI Client
//!
//! Implements [`ConversationEngine`] against the ElevenLabs conversation
//! websocket.
//!
//! ## Session Flow:
//! 1. **Resolve URL**: either fetch a signed URL with the API key, or use the
//!    public endpoint for the agent
//! 2. **Driver thread**: a dedicated OS thread runs a current-thread tokio
//!    runtime that owns the websocket
//! 3. **Handshake**: send `conversation_initiation_client_data` with dynamic
//!    variables and overrides, wait for `conversation_initiation_metadata`.
//!    The result is reported back over a oneshot so a rejected configuration
//!    becomes a failed attempt
//! 4. **Running**: caller audio arrives through the input callback and is
//!    forwarded as `user_audio_chunk`; server `audio` events go to
//!    [`AudioInterface::output`], `interruption` to
//!    [`AudioInterface::interrupt`], `ping` is answered with `pong`
//! 5. **Shutdown**: `end_session` stops the audio interface and signals the
//!    thread; `wait_for_session_end` joins it on the blocking pool. When the
//!    engine closes first, the audio interface is told through
//!    [`AudioInterface::session_finished`] so the call does not sit silent

use super::{
    AudioInterface, CallbackError, ConversationEngine, ConversationError, ConversationSession,
    InputCallback, SessionConfig,
};
use crate::config::ElevenLabsConfig;
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

type EngineSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type HandshakeResult = Result<Option<String>, ConversationError>;

#[derive(Clone)]
pub struct ElevenLabsEngine {
    http: reqwest::Client,
    api_key: Option<String>,
    api_base: String,
    ws_base: String,
    requires_auth: bool,
    handshake_timeout: Duration,
}

impl ElevenLabsEngine {
    pub fn new(config: &ElevenLabsConfig) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key: Some(config.api_key.clone()).filter(|key| !key.is_empty()),
            api_base: config.api_base.trim_end_matches('/').to_string(),
            ws_base: config.ws_base.trim_end_matches('/').to_string(),
            requires_auth: config.requires_auth,
            handshake_timeout: Duration::from_secs(config.handshake_timeout_secs),
        }
    }

    async fn session_url(&self, agent_id: &str) -> Result<String, ConversationError> {
        if agent_id.is_empty() {
            return Err(ConversationError::NotConfigured("agent id is empty".to_string()));
        }

        if !self.requires_auth {
            let url = reqwest::Url::parse_with_params(
                &format!("{}/v1/convai/conversation", self.ws_base),
                &[("agent_id", agent_id)],
            )
            .map_err(|e| ConversationError::NotConfigured(e.to_string()))?;
            return Ok(url.to_string());
        }

        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| ConversationError::NotConfigured("API key is missing".to_string()))?;

        let endpoint = reqwest::Url::parse_with_params(
            &format!("{}/v1/convai/conversation/get_signed_url", self.api_base),
            &[("agent_id", agent_id)],
        )
        .map_err(|e| ConversationError::NotConfigured(e.to_string()))?;

        let response = self
            .http
            .get(endpoint)
            .header("xi-api-key", api_key)
            .timeout(self.handshake_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ConversationError::Rejected(format!(
                "signed URL request returned {}",
                status
            )));
        }

        let body: SignedUrlResponse = response.json().await?;
        Ok(body.signed_url)
    }
}

impl ConversationEngine for ElevenLabsEngine {
    fn start_session(
        &self,
        config: SessionConfig,
        audio: Arc<dyn AudioInterface>,
    ) -> BoxFuture<'static, Result<Box<dyn ConversationSession>, ConversationError>> {
        let engine = self.clone();

        Box::pin(async move {
            let url = engine.session_url(&config.agent_id).await?;

            let (ready_tx, ready_rx) = oneshot::channel::<HandshakeResult>();
            let (stop_tx, stop_rx) = oneshot::channel::<()>();

            let driver = SessionDriver {
                url,
                initiation: initiation_message(&config),
                audio: audio.clone(),
                handshake_timeout: engine.handshake_timeout,
            };

            let handle = std::thread::Builder::new()
                .name("convai-session".to_string())
                .spawn(move || driver.run(ready_tx, stop_rx))
                .map_err(|e| ConversationError::Driver(e.to_string()))?;

            match ready_rx.await {
                Ok(Ok(conversation_id)) => Ok(Box::new(ElevenLabsSession {
                    conversation_id,
                    audio,
                    stop_tx: Some(stop_tx),
                    driver: Some(handle),
                }) as Box<dyn ConversationSession>),
                // The driver thread returns right after reporting a failure.
                Ok(Err(err)) => Err(err),
                Err(_) => Err(ConversationError::Driver(
                    "session driver exited before the handshake completed".to_string(),
                )),
            }
        })
    }
}

#[derive(Debug, Deserialize)]
struct SignedUrlResponse {
    signed_url: String,
}

/// First client message: persona variables and per-session overrides.
fn initiation_message(config: &SessionConfig) -> String {
    let mut message = json!({ "type": "conversation_initiation_client_data" });
    if let Some(overrides) = &config.overrides {
        message["conversation_config_override"] = json!(overrides);
    }
    if let Some(variables) = &config.dynamic_variables {
        message["dynamic_variables"] = json!(variables);
    }
    message.to_string()
}

/// Owns the websocket on the driver thread.
struct SessionDriver {
    url: String,
    initiation: String,
    audio: Arc<dyn AudioInterface>,
    handshake_timeout: Duration,
}

impl SessionDriver {
    fn run(self, ready: oneshot::Sender<HandshakeResult>, stop: oneshot::Receiver<()>) -> Option<String> {
        let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(e) => {
                let _ = ready.send(Err(ConversationError::Driver(e.to_string())));
                return None;
            }
        };
        runtime.block_on(self.drive(ready, stop))
    }

    async fn drive(
        self,
        ready: oneshot::Sender<HandshakeResult>,
        mut stop: oneshot::Receiver<()>,
    ) -> Option<String> {
        let (mut ws, conversation_id) = match self.handshake().await {
            Ok(connected) => connected,
            Err(err) => {
                let _ = ready.send(Err(err));
                return None;
            }
        };
        if ready.send(Ok(conversation_id.clone())).is_err() {
            debug!("Session opener went away before the handshake was reported");
            let _ = ws.close(None).await;
            return conversation_id;
        }

        let (input_tx, mut input_rx) = mpsc::unbounded_channel::<Vec<u8>>();
        let callback: InputCallback = Arc::new(move |pcm| {
            input_tx
                .send(pcm)
                .map_err(|_| CallbackError::new("conversation session closed"))
        });
        self.audio.start(callback);

        let mut events = EventState::default();
        let mut stop_requested = false;
        loop {
            tokio::select! {
                _ = &mut stop => {
                    debug!("Conversation session stop requested");
                    stop_requested = true;
                    break;
                }
                Some(pcm) = input_rx.recv() => {
                    let chunk = json!({ "user_audio_chunk": B64.encode(&pcm) });
                    if let Err(e) = ws.send(Message::Text(chunk.to_string())).await {
                        warn!(error = %e, "Failed to send caller audio to conversation engine");
                        break;
                    }
                }
                frame = ws.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(reply) = handle_server_event(&text, &mut events, self.audio.as_ref()) {
                            if let Err(e) = ws.send(Message::Text(reply)).await {
                                warn!(error = %e, "Failed to reply to conversation engine");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(reason = ?frame.map(|f| f.reason.to_string()), "Conversation engine closed the session");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        warn!(error = %e, "Conversation engine connection failed");
                        break;
                    }
                    None => break,
                },
            }
        }

        self.audio.stop();
        if !stop_requested {
            self.audio.session_finished();
        }
        let _ = ws.close(None).await;
        conversation_id
    }

    /// Connect, send the initiation message and wait for the engine's
    /// confirmation. Both steps share the handshake timeout.
    async fn handshake(&self) -> Result<(EngineSocket, Option<String>), ConversationError> {
        let attempt = async {
            let (mut ws, _response) = tokio_tungstenite::connect_async(self.url.as_str())
                .await
                .map_err(|e| ConversationError::Connect(e.to_string()))?;

            ws.send(Message::Text(self.initiation.clone()))
                .await
                .map_err(|e| ConversationError::Connect(e.to_string()))?;

            let conversation_id = await_initiation_metadata(&mut ws).await?;
            Ok((ws, conversation_id))
        };

        tokio::time::timeout(self.handshake_timeout, attempt)
            .await
            .map_err(|_| ConversationError::HandshakeTimeout)?
    }
}

async fn await_initiation_metadata(ws: &mut EngineSocket) -> Result<Option<String>, ConversationError> {
    while let Some(frame) = ws.next().await {
        match frame {
            Ok(Message::Text(text)) => {
                if let Ok(ServerEvent::ConversationInitiationMetadata {
                    conversation_initiation_metadata_event: metadata,
                }) = serde_json::from_str::<ServerEvent>(&text)
                {
                    return Ok(metadata.conversation_id);
                }
            }
            // A configuration the agent does not allow is refused with a close frame.
            Ok(Message::Close(frame)) => {
                let reason = frame
                    .map(|f| format!("{} ({})", f.reason, u16::from(f.code)))
                    .unwrap_or_else(|| "closed without reason".to_string());
                return Err(ConversationError::Rejected(reason));
            }
            Ok(_) => {}
            Err(e) => return Err(ConversationError::Connect(e.to_string())),
        }
    }
    Err(ConversationError::Rejected("connection ended during handshake".to_string()))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ServerEvent {
    ConversationInitiationMetadata {
        conversation_initiation_metadata_event: InitiationMetadata,
    },
    Audio {
        audio_event: AudioEvent,
    },
    Interruption {
        interruption_event: EventRef,
    },
    Ping {
        ping_event: EventRef,
    },
    AgentResponse {
        agent_response_event: AgentResponse,
    },
    UserTranscript {
        user_transcription_event: UserTranscript,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct InitiationMetadata {
    #[serde(default)]
    conversation_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AudioEvent {
    audio_base_64: String,
    #[serde(default)]
    event_id: u64,
}

#[derive(Debug, Deserialize)]
struct EventRef {
    #[serde(default)]
    event_id: u64,
}

#[derive(Debug, Deserialize)]
struct AgentResponse {
    agent_response: String,
}

#[derive(Debug, Deserialize)]
struct UserTranscript {
    user_transcript: String,
}

#[derive(Debug, Default)]
struct EventState {
    last_interrupt_id: u64,
}

/// Apply one server event to the audio interface. Returns a reply to send
/// back, if the event needs one.
fn handle_server_event(text: &str, state: &mut EventState, audio: &dyn AudioInterface) -> Option<String> {
    let event = match serde_json::from_str::<ServerEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable conversation event");
            return None;
        }
    };

    match event {
        ServerEvent::Audio { audio_event } => {
            // Audio generated before the latest barge-in is stale.
            if audio_event.event_id <= state.last_interrupt_id {
                return None;
            }
            match B64.decode(audio_event.audio_base_64.as_bytes()) {
                Ok(bytes) => audio.output(bytes),
                Err(e) => warn!(error = %e, "Dropping undecodable agent audio"),
            }
            None
        }
        ServerEvent::Interruption { interruption_event } => {
            state.last_interrupt_id = interruption_event.event_id;
            audio.interrupt();
            None
        }
        ServerEvent::Ping { ping_event } => {
            Some(json!({ "type": "pong", "event_id": ping_event.event_id }).to_string())
        }
        ServerEvent::AgentResponse { agent_response_event } => {
            info!(response = %agent_response_event.agent_response, "Agent response");
            None
        }
        ServerEvent::UserTranscript { user_transcription_event } => {
            info!(transcript = %user_transcription_event.user_transcript, "Caller transcript");
            None
        }
        ServerEvent::ConversationInitiationMetadata { .. } | ServerEvent::Other => None,
    }
}

pub struct ElevenLabsSession {
    conversation_id: Option<String>,
    audio: Arc<dyn AudioInterface>,
    stop_tx: Option<oneshot::Sender<()>>,
    driver: Option<JoinHandle<Option<String>>>,
}

impl ConversationSession for ElevenLabsSession {
    fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    fn end_session(&mut self) {
        self.audio.stop();
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }

    fn wait_for_session_end(mut self: Box<Self>) -> BoxFuture<'static, Option<String>> {
        let driver = self.driver.take();
        // Held until the join finishes; dropping it would also stop the driver.
        let stop_tx = self.stop_tx.take();
        let known_id = self.conversation_id.clone();

        Box::pin(async move {
            let joined = match driver {
                Some(handle) => tokio::task::spawn_blocking(move || handle.join())
                    .await
                    .ok()
                    .and_then(|result| result.ok())
                    .flatten(),
                None => None,
            };
            drop(stop_tx);
            joined.or(known_id)
        })
    }
}

impl Drop for ElevenLabsSession {
    fn drop(&mut self) {
        if let Some(stop) = self.stop_tx.take() {
            let _ = stop.send(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::future::Future;
    use std::sync::Mutex;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
    use tokio_tungstenite::tungstenite::protocol::CloseFrame;

    type ServerSocket = WebSocketStream<TcpStream>;

    #[derive(Default)]
    struct RecordingAudio {
        callback: Mutex<Option<InputCallback>>,
        outputs: Mutex<Vec<Vec<u8>>>,
        interrupts: Mutex<u32>,
        stops: Mutex<u32>,
        finished: Mutex<u32>,
    }

    impl AudioInterface for RecordingAudio {
        fn start(&self, input_callback: InputCallback) {
            *self.callback.lock().unwrap() = Some(input_callback);
        }
        fn stop(&self) {
            *self.stops.lock().unwrap() += 1;
        }
        fn output(&self, audio: Vec<u8>) {
            self.outputs.lock().unwrap().push(audio);
        }
        fn interrupt(&self) {
            *self.interrupts.lock().unwrap() += 1;
        }
        fn session_finished(&self) {
            *self.finished.lock().unwrap() += 1;
        }
    }

    /// Serve one engine connection on a local port with the given script.
    async fn engine_server<F, Fut>(script: F) -> ElevenLabsEngine
    where
        F: FnOnce(ServerSocket) -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            script(ws).await;
        });

        ElevenLabsEngine::new(&ElevenLabsConfig {
            ws_base: format!("ws://{}", addr),
            requires_auth: false,
            handshake_timeout_secs: 5,
            ..ElevenLabsConfig::default()
        })
    }

    fn initiation_metadata(conversation_id: &str) -> String {
        json!({
            "type": "conversation_initiation_metadata",
            "conversation_initiation_metadata_event": { "conversation_id": conversation_id }
        })
        .to_string()
    }

    async fn eventually(mut check: impl FnMut() -> bool) {
        for _ in 0..300 {
            if check() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    async fn drain_until_closed(ws: &mut ServerSocket) {
        while let Some(Ok(_)) = ws.next().await {}
    }

    fn audio_event(event_id: u64, bytes: &[u8]) -> String {
        json!({
            "type": "audio",
            "audio_event": { "audio_base_64": B64.encode(bytes), "event_id": event_id }
        })
        .to_string()
    }

    #[test]
    fn test_audio_event_is_forwarded() {
        let audio = RecordingAudio::default();
        let mut state = EventState::default();

        let reply = handle_server_event(&audio_event(1, &[1, 2, 3]), &mut state, &audio);
        assert!(reply.is_none());
        assert_eq!(*audio.outputs.lock().unwrap(), vec![vec![1, 2, 3]]);
    }

    #[test]
    fn test_interruption_drops_stale_audio() {
        let audio = RecordingAudio::default();
        let mut state = EventState::default();

        let interruption = json!({ "type": "interruption", "interruption_event": { "event_id": 7 } });
        handle_server_event(&interruption.to_string(), &mut state, &audio);
        assert_eq!(*audio.interrupts.lock().unwrap(), 1);

        handle_server_event(&audio_event(6, &[9]), &mut state, &audio);
        handle_server_event(&audio_event(7, &[9]), &mut state, &audio);
        handle_server_event(&audio_event(8, &[8]), &mut state, &audio);
        assert_eq!(*audio.outputs.lock().unwrap(), vec![vec![8]]);
    }

    #[test]
    fn test_ping_is_answered() {
        let audio = RecordingAudio::default();
        let mut state = EventState::default();

        let ping = json!({ "type": "ping", "ping_event": { "event_id": 42, "ping_ms": 80 } });
        let reply = handle_server_event(&ping.to_string(), &mut state, &audio).unwrap();
        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["type"], "pong");
        assert_eq!(reply["event_id"], 42);
    }

    #[test]
    fn test_unknown_and_garbage_events_are_ignored() {
        let audio = RecordingAudio::default();
        let mut state = EventState::default();

        assert!(handle_server_event(r#"{"type":"vad_score","vad_score_event":{}}"#, &mut state, &audio).is_none());
        assert!(handle_server_event("not json", &mut state, &audio).is_none());
        assert!(audio.outputs.lock().unwrap().is_empty());
    }

    #[test]
    fn test_initiation_message_carries_variables_and_overrides() {
        use crate::conversation::{ConversationOverride, TtsOverride};
        use std::collections::BTreeMap;

        let mut variables = BTreeMap::new();
        variables.insert("era_name".to_string(), json!("baroque"));
        let config = SessionConfig {
            agent_id: "agent-1".to_string(),
            dynamic_variables: Some(variables),
            overrides: Some(ConversationOverride {
                agent: None,
                tts: Some(TtsOverride {
                    voice_id: Some("voice-1".to_string()),
                    ..TtsOverride::default()
                }),
            }),
        };

        let message: serde_json::Value = serde_json::from_str(&initiation_message(&config)).unwrap();
        assert_eq!(message["type"], "conversation_initiation_client_data");
        assert_eq!(message["dynamic_variables"]["era_name"], "baroque");
        assert_eq!(message["conversation_config_override"]["tts"]["voice_id"], "voice-1");

        let basic: serde_json::Value =
            serde_json::from_str(&initiation_message(&SessionConfig::basic("agent-1"))).unwrap();
        assert!(basic.get("dynamic_variables").is_none());
        assert!(basic.get("conversation_config_override").is_none());
    }

    #[tokio::test]
    async fn test_public_url_needs_no_network() {
        let engine = ElevenLabsEngine::new(&ElevenLabsConfig {
            requires_auth: false,
            ..ElevenLabsConfig::default()
        });
        let url = engine.session_url("agent 1").await.unwrap();
        assert!(url.starts_with("wss://"));
        assert!(url.ends_with("/v1/convai/conversation?agent_id=agent+1"));
    }

    #[tokio::test]
    async fn test_refused_configuration_is_rejected() {
        let engine = engine_server(|mut ws| async move {
            let _initiation = ws.next().await;
            let refusal = CloseFrame {
                code: CloseCode::Policy,
                reason: "override not allowed".into(),
            };
            let _ = ws.close(Some(refusal)).await;
            drain_until_closed(&mut ws).await;
        })
        .await;

        let audio = Arc::new(RecordingAudio::default());
        let err = engine
            .start_session(SessionConfig::basic("agent-1"), audio.clone())
            .await
            .err()
            .expect("handshake should be refused");

        match err {
            ConversationError::Rejected(reason) => {
                assert!(reason.contains("override not allowed"));
                assert!(reason.contains("1008"));
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert!(audio.callback.lock().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_accepted_session_carries_audio_both_ways() {
        let (heard_tx, heard_rx) = oneshot::channel::<serde_json::Value>();
        let engine = engine_server(|mut ws| async move {
            let _initiation = ws.next().await;
            ws.send(Message::Text(initiation_metadata("conv-1"))).await.unwrap();
            ws.send(Message::Text(audio_event(1, &[7, 8]))).await.unwrap();

            while let Some(Ok(message)) = ws.next().await {
                if let Message::Text(text) = message {
                    let value: serde_json::Value = serde_json::from_str(&text).unwrap();
                    if value.get("user_audio_chunk").is_some() {
                        let _ = heard_tx.send(value);
                        break;
                    }
                }
            }
            drain_until_closed(&mut ws).await;
        })
        .await;

        let audio = Arc::new(RecordingAudio::default());
        let mut session = match engine.start_session(SessionConfig::basic("agent-1"), audio.clone()).await {
            Ok(session) => session,
            Err(e) => panic!("session should open: {}", e),
        };
        assert_eq!(session.conversation_id(), Some("conv-1"));

        eventually(|| audio.callback.lock().unwrap().is_some()).await;
        let callback = audio.callback.lock().unwrap().clone().unwrap();
        callback(vec![1, 2, 3, 4]).unwrap();

        let heard = heard_rx.await.unwrap();
        assert_eq!(heard, json!({ "user_audio_chunk": "AQIDBA==" }));

        eventually(|| !audio.outputs.lock().unwrap().is_empty()).await;
        assert_eq!(*audio.outputs.lock().unwrap(), vec![vec![7, 8]]);

        session.end_session();
        assert_eq!(session.wait_for_session_end().await.as_deref(), Some("conv-1"));
    }

    #[tokio::test]
    async fn test_end_session_returns_the_conversation_id() {
        let engine = engine_server(|mut ws| async move {
            let _initiation = ws.next().await;
            ws.send(Message::Text(initiation_metadata("conv-2"))).await.unwrap();
            drain_until_closed(&mut ws).await;
        })
        .await;

        let audio = Arc::new(RecordingAudio::default());
        let mut session = match engine.start_session(SessionConfig::basic("agent-1"), audio.clone()).await {
            Ok(session) => session,
            Err(e) => panic!("session should open: {}", e),
        };

        session.end_session();
        assert_eq!(session.wait_for_session_end().await.as_deref(), Some("conv-2"));
        // end_session and the driver both release the audio interface.
        assert_eq!(*audio.stops.lock().unwrap(), 2);
        assert_eq!(*audio.finished.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_engine_closing_first_finishes_the_call() {
        let engine = engine_server(|mut ws| async move {
            let _initiation = ws.next().await;
            ws.send(Message::Text(initiation_metadata("conv-3"))).await.unwrap();
            let _ = ws.close(None).await;
            drain_until_closed(&mut ws).await;
        })
        .await;

        let audio = Arc::new(RecordingAudio::default());
        let session = match engine.start_session(SessionConfig::basic("agent-1"), audio.clone()).await {
            Ok(session) => session,
            Err(e) => panic!("session should open: {}", e),
        };

        eventually(|| *audio.finished.lock().unwrap() == 1).await;
        assert_eq!(session.wait_for_session_end().await.as_deref(), Some("conv-3"));
        assert_eq!(*audio.finished.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_signed_url_requires_key() {
        let engine = ElevenLabsEngine::new(&ElevenLabsConfig {
            api_key: String::new(),
            requires_auth: true,
            ..ElevenLabsConfig::default()
        });
        let err = engine.session_url("agent-1").await.unwrap_err();
        assert!(matches!(err, ConversationError::NotConfigured(_)));
    }
}
