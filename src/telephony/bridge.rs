//! # Telephony Audio Bridge
//!
//! Adapts one Twilio media stream to the [`AudioInterface`] the conversation
//! engine drives.
//!
//! ## Two Execution Contexts:
//! - The connection task calls [`TelephonyBridge::dispatch`] for every inbound
//!   event, in arrival order.
//! - The engine's driver thread calls `output` and `interrupt`. Those never
//!   touch the websocket; they serialize a message and push it onto an
//!   unbounded channel that the connection actor drains, so they return
//!   without waiting on the network and preserve emission order.
//!
//! ## Per-Frame Failures:
//! A media frame that cannot be decoded, or whose callback fails or panics,
//! is logged and dropped. The stream carries on with the next frame.

use super::protocol::{MediaPayload, OutboundFrame, OutboundMessage, StartMetadata, StreamEvent};
use crate::audio::{transcoder, StreamMetrics, StreamSession, TimingSample};
use crate::config::LoggingConfig;
use crate::conversation::{AudioInterface, CallbackError, InputCallback};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine as _;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Result of dispatching one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A stream started; outbound audio can now be addressed.
    Started,
    /// The frame was decoded and handed to the input callback.
    MediaDelivered,
    /// No callback is registered yet; the frame was not decoded.
    MediaSkipped,
    /// The frame was lost; see the log.
    FrameDropped,
    /// The call leg ended; the session should wind down.
    StopRequested,
    Ignored,
}

/// Why one media frame was dropped.
#[derive(Debug)]
pub enum FrameError {
    Payload(base64::DecodeError),
    Callback(CallbackError),
    CallbackPanicked,
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Payload(e) => write!(f, "invalid media payload: {}", e),
            FrameError::Callback(e) => write!(f, "{}", e),
            FrameError::CallbackPanicked => write!(f, "input callback panicked"),
        }
    }
}

impl std::error::Error for FrameError {}

pub struct TelephonyBridge {
    outbound: mpsc::UnboundedSender<OutboundFrame>,
    session: Mutex<StreamSession>,
    timing: Mutex<TimingSample>,
    input_callback: Mutex<Option<InputCallback>>,
    debug_logs: bool,
    frame_log_interval: u64,
}

impl TelephonyBridge {
    pub fn new(outbound: mpsc::UnboundedSender<OutboundFrame>, logging: &LoggingConfig) -> Self {
        Self {
            outbound,
            session: Mutex::new(StreamSession::new()),
            timing: Mutex::new(TimingSample::default()),
            input_callback: Mutex::new(None),
            debug_logs: logging.debug_logs,
            frame_log_interval: logging.frame_log_interval.max(1),
        }
    }

    /// Apply one inbound protocol event.
    pub fn dispatch(&self, event: &StreamEvent) -> DispatchOutcome {
        match event {
            StreamEvent::Start { start } => {
                self.begin_stream(start);
                DispatchOutcome::Started
            }
            StreamEvent::Media { media } => match self.handle_media(media) {
                Ok(true) => DispatchOutcome::MediaDelivered,
                Ok(false) => DispatchOutcome::MediaSkipped,
                Err(e) => {
                    let stream_sid = self.stream_id().unwrap_or_default();
                    warn!(stream_sid = %stream_sid, error = %e, "Dropping media frame");
                    DispatchOutcome::FrameDropped
                }
            },
            StreamEvent::Stop => {
                let stream_sid = self.stream_id().unwrap_or_default();
                info!(stream_sid = %stream_sid, "Stream stop received");
                DispatchOutcome::StopRequested
            }
            StreamEvent::Other => DispatchOutcome::Ignored,
        }
    }

    fn begin_stream(&self, start: &StartMetadata) {
        lock(&self.session).begin(start.stream_sid.clone(), start.call_sid.clone());
        lock(&self.timing).begin_stream(Instant::now());
        info!(stream_sid = %start.stream_sid, call_sid = %start.call_sid, "Media stream started");
    }

    /// Decode one frame and feed it to the callback. `Ok(false)` when no
    /// callback is registered.
    fn handle_media(&self, media: &MediaPayload) -> Result<bool, FrameError> {
        lock(&self.timing).record_inbound(Instant::now());

        let callback = match lock(&self.input_callback).clone() {
            Some(callback) => callback,
            None => return Ok(false),
        };

        let encoded = B64.decode(media.payload.as_bytes()).map_err(FrameError::Payload)?;
        let (sequence, pcm) = lock(&self.session).decode_frame(&encoded);

        if self.debug_logs && sequence % self.frame_log_interval == 0 {
            debug!(
                frame = sequence,
                encoded_bytes = encoded.len(),
                pcm_bytes = pcm.len(),
                "Inbound media"
            );
        }

        // The callback runs without any bridge lock held.
        match panic::catch_unwind(AssertUnwindSafe(|| callback(pcm))) {
            Ok(Ok(())) => Ok(true),
            Ok(Err(e)) => Err(FrameError::Callback(e)),
            Err(_) => Err(FrameError::CallbackPanicked),
        }
    }

    pub fn stream_id(&self) -> Option<String> {
        lock(&self.session).stream_id().map(str::to_string)
    }

    pub fn call_id(&self) -> Option<String> {
        lock(&self.session).call_id().map(str::to_string)
    }

    #[cfg(test)]
    pub(crate) fn has_input_callback(&self) -> bool {
        lock(&self.input_callback).is_some()
    }

    /// Timing statistics for the current stream.
    pub fn metrics(&self) -> StreamMetrics {
        lock(&self.timing).export()
    }

    /// Ask the connection owner to close the socket.
    pub fn hang_up(&self) {
        if self.outbound.send(OutboundFrame::Hangup).is_err() {
            debug!("Hangup requested after the connection closed");
        }
    }

    fn send(&self, message: OutboundMessage) {
        match message.to_json() {
            Ok(text) => {
                if self.outbound.send(OutboundFrame::Text(text)).is_err() {
                    debug!("Connection closed, outbound message discarded");
                }
            }
            Err(e) => warn!(error = %e, "Failed to serialize outbound message"),
        }
    }
}

impl AudioInterface for TelephonyBridge {
    fn start(&self, input_callback: InputCallback) {
        *lock(&self.input_callback) = Some(input_callback);
        debug!("Input callback registered");
    }

    fn stop(&self) {
        let had_callback = lock(&self.input_callback).take().is_some();
        let mut session = lock(&self.session);
        if had_callback {
            debug!(
                call_sid = session.call_id().unwrap_or_default(),
                frames = session.frames_received(),
                "Audio bridge stopped"
            );
        }
        session.end();
    }

    fn output(&self, audio: Vec<u8>) {
        lock(&self.timing).record_output(Instant::now());

        let stream_id = match self.stream_id() {
            Some(stream_id) => stream_id,
            None => {
                debug!(bytes = audio.len(), "Agent audio before stream start, discarded");
                return;
            }
        };

        let payload = transcoder::encode_outbound(audio);
        self.send(OutboundMessage::media(stream_id, &payload));
    }

    fn interrupt(&self) {
        if let Some(stream_id) = self.stream_id() {
            debug!(stream_sid = %stream_id, "Clearing caller-side audio buffer");
            self.send(OutboundMessage::clear(stream_id));
        }
    }

    fn session_finished(&self) {
        info!(call_sid = ?self.call_id(), "Conversation ended by the agent, hanging up");
        self.hang_up();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
