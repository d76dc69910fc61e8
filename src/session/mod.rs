//! # Call Session Module
//!
//! One media-stream connection from start to teardown.
//!
//! ## Lifecycle:
//! ```text
//! AwaitingStart --start--> Active --stop/close/protocol error--> Ending --> Terminated
//!       |                                                          ^
//!       +--------------- stop/close/all attempts failed -----------+
//! ```
//!
//! The websocket actor owns the socket and forwards every inbound text frame
//! (and the fact that the socket closed) as an [`InboundFrame`]; the
//! [`orchestrator`] task consumes them in order.

pub mod orchestrator;   // Per-connection state machine

pub use orchestrator::{SessionContext, SessionOrchestrator};

/// What the connection owner forwards to the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    Text(String),
    /// The socket closed or errored; nothing else will arrive.
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    AwaitingStart,
    Active,
    Ending,
    Terminated,
}

impl SessionPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionPhase::AwaitingStart => "awaiting_start",
            SessionPhase::Active => "active",
            SessionPhase::Ending => "ending",
            SessionPhase::Terminated => "terminated",
        }
    }
}
