//! # Stream Timing and Metrics
//!
//! Per-stream latency bookkeeping. The hot path only appends timestamps to a
//! [`TimingSample`]; all statistics are derived on demand by
//! [`TimingSample::export`], typically once when the stream ends.
//!
//! ## Exported Metrics:
//! - **first_out_ms**: stream start → first outbound audio
//! - **avg_out_interval_ms / p95_out_interval_ms**: spacing between outbound sends
//! - **min_round_trip_ms**: best observed gap between an inbound frame and the
//!   next outbound send
//! - **out_intervals_count**: number of recorded intervals

use serde::Serialize;
use std::time::{Duration, Instant};

/// Raw timestamps for one stream.
#[derive(Debug, Clone, Default)]
pub struct TimingSample {
    stream_started_at: Option<Instant>,
    first_output_sent_at: Option<Instant>,
    previous_output_sent_at: Option<Instant>,
    output_intervals: Vec<Duration>,
    last_inbound_media_at: Option<Instant>,
    min_round_trip: Option<Duration>,
    outputs_sent: u64,
}

/// Derived statistics, ready to log or serialize.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StreamMetrics {
    pub first_out_ms: Option<f64>,
    pub avg_out_interval_ms: Option<f64>,
    pub p95_out_interval_ms: Option<f64>,
    pub min_round_trip_ms: Option<f64>,
    pub out_intervals_count: usize,
    pub outputs_sent: u64,
}

impl TimingSample {
    /// Start measuring a new stream. Anything recorded for a previous stream
    /// is discarded.
    pub fn begin_stream(&mut self, at: Instant) {
        *self = Self {
            stream_started_at: Some(at),
            ..Self::default()
        };
    }

    pub fn record_inbound(&mut self, at: Instant) {
        self.last_inbound_media_at = Some(at);
    }

    /// Record one outbound send.
    pub fn record_output(&mut self, at: Instant) {
        self.outputs_sent += 1;

        if self.first_output_sent_at.is_none() {
            self.first_output_sent_at = Some(at);
        }

        if let Some(previous) = self.previous_output_sent_at {
            self.output_intervals.push(at.saturating_duration_since(previous));
        }
        self.previous_output_sent_at = Some(at);

        if let Some(inbound) = self.last_inbound_media_at {
            let round_trip = at.saturating_duration_since(inbound);
            self.min_round_trip = Some(match self.min_round_trip {
                Some(best) => best.min(round_trip),
                None => round_trip,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn output_intervals(&self) -> &[Duration] {
        &self.output_intervals
    }

    /// Compute the derived statistics.
    pub fn export(&self) -> StreamMetrics {
        let first_out_ms = match (self.stream_started_at, self.first_output_sent_at) {
            (Some(start), Some(first)) => Some(millis(first.saturating_duration_since(start))),
            _ => None,
        };

        let (avg_out_interval_ms, p95_out_interval_ms) = if self.output_intervals.is_empty() {
            (None, None)
        } else {
            let total: Duration = self.output_intervals.iter().sum();
            let average = millis(total) / self.output_intervals.len() as f64;

            let mut sorted = self.output_intervals.clone();
            sorted.sort_unstable();
            let index = ((sorted.len() as f64 * 0.95) as usize).min(sorted.len() - 1);

            (Some(average), Some(millis(sorted[index])))
        };

        StreamMetrics {
            first_out_ms,
            avg_out_interval_ms,
            p95_out_interval_ms,
            min_round_trip_ms: self.min_round_trip.map(millis),
            out_intervals_count: self.output_intervals.len(),
            outputs_sent: self.outputs_sent,
        }
    }
}

// Microsecond resolution keeps whole-millisecond durations exact in f64.
fn millis(duration: Duration) -> f64 {
    duration.as_micros() as f64 / 1_000.0
}
