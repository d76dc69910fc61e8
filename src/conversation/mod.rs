//! # Conversation Engine Seam
//!
//! The voice-AI engine is an external collaborator. This module defines the
//! contract between it and the telephony side:
//!
//! - [`AudioInterface`]: what the engine needs from a transport. The engine
//!   calls `start` once with an input callback, pushes synthesized audio
//!   through `output`, asks for playback to be cut with `interrupt` and calls
//!   `stop` when it is done. The telephony bridge implements it; another
//!   transport could implement it without the engine side changing.
//! - [`ConversationEngine`]: opens a session for a [`SessionConfig`].
//! - [`ConversationSession`]: a running session that can be ended and
//!   waited on.
//!
//! ## Threading:
//! Engines run their own audio I/O on a separate thread and call the
//! interface from there, which is why every method takes `&self` and the
//! trait requires `Send + Sync`.

pub mod attempts;     // Ordered configuration fallback
pub mod elevenlabs;   // ElevenLabs Conversational AI client

pub use attempts::{establish_session, AttemptKind, EstablishedSession, SessionPlan};

use futures_util::future::BoxFuture;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Callback the engine registers to receive caller audio (s16le, 16 kHz).
pub type InputCallback = Arc<dyn Fn(Vec<u8>) -> Result<(), CallbackError> + Send + Sync>;

/// Transport side of a conversation.
pub trait AudioInterface: Send + Sync {
    /// Register the function that receives decoded caller audio.
    fn start(&self, input_callback: InputCallback);

    /// Unregister the callback and release transport state. Idempotent.
    fn stop(&self);

    /// Queue engine audio for playback. Must return without waiting for the
    /// network.
    fn output(&self, audio: Vec<u8>);

    /// Cut any audio still buffered on the caller's side (barge-in).
    fn interrupt(&self);

    /// The engine ended the conversation without being asked to.
    fn session_finished(&self) {}
}

/// Opens conversation sessions.
pub trait ConversationEngine: Send + Sync {
    /// Open and start a session. The future resolves once the engine has
    /// accepted the configuration, so a rejected configuration surfaces here
    /// as an error rather than as a silent call.
    fn start_session(
        &self,
        config: SessionConfig,
        audio: Arc<dyn AudioInterface>,
    ) -> BoxFuture<'static, Result<Box<dyn ConversationSession>, ConversationError>>;
}

/// A running conversation.
pub trait ConversationSession: Send {
    fn conversation_id(&self) -> Option<&str>;

    /// Ask the session to wind down. Returns immediately.
    fn end_session(&mut self);

    /// Wait until the session has released all of its resources.
    fn wait_for_session_end(self: Box<Self>) -> BoxFuture<'static, Option<String>>;
}

/// Everything needed to open one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub agent_id: String,
    pub dynamic_variables: Option<BTreeMap<String, serde_json::Value>>,
    pub overrides: Option<ConversationOverride>,
}

impl SessionConfig {
    pub fn basic(agent_id: impl Into<String>) -> Self {
        Self {
            agent_id: agent_id.into(),
            dynamic_variables: None,
            overrides: None,
        }
    }
}

/// Per-session override of the agent's default voice and greeting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ConversationOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent: Option<AgentOverride>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tts: Option<TtsOverride>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AgentOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TtsOverride {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub voice_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stability: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_boost: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub style: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub speed: Option<f32>,
}

/// Failure reported by an input callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackError(pub String);

impl CallbackError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "input callback failed: {}", self.0)
    }
}

impl std::error::Error for CallbackError {}

/// Why a session could not be opened.
#[derive(Debug)]
pub enum ConversationError {
    /// No API credentials or agent id configured.
    NotConfigured(String),
    /// The engine refused the session (bad agent, disallowed override, ...).
    Rejected(String),
    /// Network-level failure reaching the engine.
    Connect(String),
    /// The engine did not confirm the session in time.
    HandshakeTimeout,
    /// The session driver could not be started locally.
    Driver(String),
}

impl fmt::Display for ConversationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConversationError::NotConfigured(msg) => write!(f, "conversation engine not configured: {}", msg),
            ConversationError::Rejected(msg) => write!(f, "session rejected: {}", msg),
            ConversationError::Connect(msg) => write!(f, "connection failed: {}", msg),
            ConversationError::HandshakeTimeout => write!(f, "session handshake timed out"),
            ConversationError::Driver(msg) => write!(f, "session driver failed: {}", msg),
        }
    }
}

impl std::error::Error for ConversationError {}

impl From<reqwest::Error> for ConversationError {
    fn from(err: reqwest::Error) -> Self {
        ConversationError::Connect(err.to_string())
    }
}
