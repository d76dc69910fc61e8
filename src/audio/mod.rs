//! # Audio Module
//!
//! Everything that touches raw call audio.
//!
//! ## Key Components:
//! - **codec**: G.711 µ-law expand/compress
//! - **resample**: linear rate converter with carry-over state
//! - **transcoder**: the inbound (µ-law 8 kHz → PCM 16 kHz) and outbound
//!   (passthrough) conversion paths
//! - **session**: per-stream state (stream id, frame counter, resampler state)
//! - **timing**: per-stream timestamps and the metrics derived from them
//!
//! ## Audio Formats:
//! - **Telephony leg**: µ-law, 8 kHz, mono, one byte per sample
//! - **Engine input**: s16le PCM, 16 kHz, mono

pub mod codec;        // µ-law companding
pub mod resample;     // Continuous-state rate conversion
pub mod session;      // Stream session state
pub mod timing;       // Timing samples and derived metrics
pub mod transcoder;   // Inbound/outbound conversion paths

pub use session::StreamSession;
pub use timing::{StreamMetrics, TimingSample};
