//! # Stream Session State
//!
//! Mutable state for one telephony call leg: the stream handle Twilio assigns
//! at `start`, the call it belongs to, an inbound frame counter and the
//! resampler continuity state.
//!
//! ## Lifecycle:
//! 1. **Idle**: created with the bridge, no stream id yet
//! 2. **Streaming**: `begin` stores the ids and clears the resampler
//! 3. **Idle again**: `end` drops the stream id and resampler state
//!
//! A session is owned by exactly one bridge, so nothing here is shared across
//! calls.

use super::resample::RateCvState;
use super::transcoder;

#[derive(Debug, Default)]
pub struct StreamSession {
    stream_id: Option<String>,
    call_id: Option<String>,
    frames_received: u64,
    resample_state: Option<RateCvState>,
}

impl StreamSession {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach to a freshly started stream.
    pub fn begin(&mut self, stream_id: impl Into<String>, call_id: impl Into<String>) {
        self.stream_id = Some(stream_id.into());
        self.call_id = Some(call_id.into());
        self.frames_received = 0;
        self.resample_state = None;
    }

    /// Detach from the stream. Safe to call repeatedly.
    pub fn end(&mut self) {
        self.stream_id = None;
        self.resample_state = None;
    }

    pub fn stream_id(&self) -> Option<&str> {
        self.stream_id.as_deref()
    }

    pub fn call_id(&self) -> Option<&str> {
        self.call_id.as_deref()
    }

    pub fn frames_received(&self) -> u64 {
        self.frames_received
    }

    /// Decode one µ-law frame to 16 kHz PCM, carrying resampler state over
    /// from the previous frame. Returns the frame's sequence number along
    /// with the PCM.
    pub fn decode_frame(&mut self, encoded: &[u8]) -> (u64, Vec<u8>) {
        self.frames_received += 1;
        let (pcm, next_state) = transcoder::decode_inbound(encoded, self.resample_state);
        self.resample_state = next_state;
        (self.frames_received, pcm)
    }

    #[cfg(test)]
    pub(crate) fn has_resample_state(&self) -> bool {
        self.resample_state.is_some()
    }
}
