//! # Telephony Module
//!
//! The Twilio side of a call.
//!
//! ## Key Components:
//! - **protocol**: media-stream JSON events in both directions
//! - **bridge**: the [`AudioInterface`](crate::conversation::AudioInterface)
//!   implementation that turns stream events into engine input and engine
//!   output into stream messages
//! - **client**: REST client for placing and ending calls
//! - **provider_error**: Twilio error code → caller-facing taxonomy
//! - **twiml**: call instruction documents

pub mod bridge;           // Stream ↔ engine audio adapter
pub mod client;           // Twilio REST API
pub mod protocol;         // Media stream wire format
pub mod provider_error;   // Error code mapping
pub mod twiml;            // <Connect><Stream> documents

pub use bridge::{DispatchOutcome, TelephonyBridge};
pub use client::{CallRequest, HangupStatus, TelephonyApi, TelephonyError, TwilioClient};
pub use protocol::{OutboundFrame, StreamEvent};
pub use provider_error::ProviderFailure;
