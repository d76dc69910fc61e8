//! # Telephony Audio Transcoder
//!
//! The two conversion paths between the phone network and the conversation
//! engine:
//!
//! - **Inbound**: µ-law 8 kHz (one byte per sample) → s16le 8 kHz → s16le
//!   16 kHz through a continuous-state rate converter.
//! - **Outbound**: passthrough. The engine is configured to emit µ-law 8 kHz,
//!   which is already what the telephony stream expects.

use super::codec;
use super::resample::{RateConverter, RateCvState};
use byteorder::{ByteOrder, LittleEndian};

/// Sample rate of the PCM handed to the conversation engine.
pub const ENGINE_INPUT_RATE: u32 = 16_000;

/// Sample rate of the telephony leg.
pub const TELEPHONY_RATE: u32 = 8_000;

/// Decode one inbound chunk.
///
/// `state` is the converter state returned by the previous chunk of the same
/// stream, or `None` for the first chunk. The returned state must be passed
/// to the next call. An empty chunk yields empty output and hands the state
/// back untouched.
pub fn decode_inbound(
    encoded: &[u8],
    state: Option<RateCvState>,
) -> (Vec<u8>, Option<RateCvState>) {
    if encoded.is_empty() {
        return (Vec::new(), state);
    }

    let narrowband = codec::expand(encoded);
    let (wideband, next_state) = RateConverter::narrowband_to_wideband().convert(&narrowband, state);

    (samples_to_bytes(&wideband), Some(next_state))
}

/// Encode outbound engine audio for the telephony stream.
pub fn encode_outbound(audio: Vec<u8>) -> Vec<u8> {
    audio
}

/// Serialize samples as s16le.
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; samples.len() * 2];
    LittleEndian::write_i16_into(samples, &mut bytes);
    bytes
}
