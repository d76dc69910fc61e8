//! # Call Status Registry
//!
//! Process-lifetime record of every call this server placed or streamed.
//!
//! ## Locking:
//! The outer `RwLock` guards only the key set and is held just long enough
//! to find or insert an entry. Each record has its own `Mutex`, so updates
//! to different calls never wait on each other.
//!
//! ## State Rules:
//! States only move forward (initiated → ringing → answered → ended/failed)
//! and `ended`/`failed` are final. Provider callbacks that arrive late or out
//! of order are therefore harmless.

use crate::audio::StreamMetrics;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CallState {
    Initiated,
    Ringing,
    Answered,
    Ended,
    Failed,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, CallState::Ended | CallState::Failed)
    }

    fn rank(&self) -> u8 {
        match self {
            CallState::Initiated => 0,
            CallState::Ringing => 1,
            CallState::Answered => 2,
            CallState::Ended | CallState::Failed => 3,
        }
    }

    /// Map a Twilio `CallStatus` value.
    pub fn from_provider_status(status: &str) -> Option<Self> {
        match status {
            "queued" | "initiated" => Some(CallState::Initiated),
            "ringing" => Some(CallState::Ringing),
            "in-progress" | "answered" => Some(CallState::Answered),
            "completed" => Some(CallState::Ended),
            "busy" | "no-answer" | "failed" | "canceled" => Some(CallState::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CallState::Initiated => "initiated",
            CallState::Ringing => "ringing",
            CallState::Answered => "answered",
            CallState::Ended => "ended",
            CallState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct CallRecord {
    pub call_sid: String,
    pub status: CallState,
    pub to: Option<String>,
    pub lang: Option<String>,
    pub year: Option<i32>,
    pub twiml_requested: bool,
    pub websocket_connected: bool,
    pub stream_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<StreamMetrics>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl CallRecord {
    fn new(call_sid: &str, status: CallState) -> Self {
        let now = Utc::now();
        Self {
            call_sid: call_sid.to_string(),
            status,
            to: None,
            lang: None,
            year: None,
            twiml_requested: false,
            websocket_connected: false,
            stream_id: None,
            end_reason: None,
            metrics: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next` unless that would go backwards or leave a final state.
    fn advance(&mut self, next: CallState) -> bool {
        if self.status == next {
            return false;
        }
        if self.status.is_terminal() || next.rank() < self.status.rank() {
            debug!(call_sid = %self.call_sid, from = self.status.as_str(), to = next.as_str(), "Ignoring call state regression");
            return false;
        }
        self.status = next;
        true
    }
}

#[derive(Debug, Default)]
pub struct CallRegistry {
    calls: RwLock<HashMap<String, Arc<Mutex<CallRecord>>>>,
}

impl CallRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a call we just placed.
    pub fn insert_initiated(&self, call_sid: &str, to: &str, lang: &str, year: i32) -> CallRecord {
        let mut record = CallRecord::new(call_sid, CallState::Initiated);
        record.to = Some(to.to_string());
        record.lang = Some(lang.to_string());
        record.year = Some(year);

        let snapshot = record.clone();
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call_sid.to_string(), Arc::new(Mutex::new(record)));
        snapshot
    }

    pub fn get(&self, call_sid: &str) -> Option<CallRecord> {
        let entry = self.entry(call_sid)?;
        let record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(record.clone())
    }

    pub fn len(&self) -> usize {
        self.calls.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Number of calls per state.
    pub fn state_counts(&self) -> HashMap<&'static str, usize> {
        let entries: Vec<_> = self
            .calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut counts = HashMap::new();
        for entry in entries {
            let state = entry.lock().unwrap_or_else(PoisonError::into_inner).status;
            *counts.entry(state.as_str()).or_insert(0) += 1;
        }
        counts
    }

    pub fn mark_twiml_requested(&self, call_sid: &str) -> Option<CallRecord> {
        self.update(call_sid, |record| {
            record.twiml_requested = true;
        })
    }

    /// Apply a provider status callback. Unknown status values are ignored.
    pub fn apply_provider_status(&self, call_sid: &str, provider_status: &str) -> Option<CallRecord> {
        let next = CallState::from_provider_status(provider_status)?;
        self.update(call_sid, |record| {
            if record.advance(next) && next.is_terminal() {
                record.end_reason = Some(provider_status.to_string());
            }
        })
    }

    /// The media stream for a call started. Calls placed elsewhere get a
    /// record here.
    pub fn stream_started(&self, call_sid: &str, stream_id: &str) -> CallRecord {
        let entry = self.entry_or_insert(call_sid);
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        record.advance(CallState::Answered);
        record.websocket_connected = true;
        record.stream_id = Some(stream_id.to_string());
        record.updated_at = Utc::now();
        record.clone()
    }

    /// The media stream ended; the call is over unless already settled.
    pub fn stream_ended(&self, call_sid: &str, metrics: StreamMetrics) -> Option<CallRecord> {
        self.update(call_sid, |record| {
            record.websocket_connected = false;
            if record.advance(CallState::Ended) {
                record.end_reason = Some("stream-ended".to_string());
            }
            record.metrics = Some(metrics);
        })
    }

    /// Explicit end request. `no-answer` marks the call failed, anything
    /// else ended.
    pub fn end_call(&self, call_sid: &str, reason: Option<&str>) -> Option<CallRecord> {
        let next = match reason {
            Some("no-answer") => CallState::Failed,
            _ => CallState::Ended,
        };
        self.update(call_sid, |record| {
            if record.advance(next) {
                record.end_reason = Some(reason.unwrap_or("ended-by-request").to_string());
            }
        })
    }

    fn entry(&self, call_sid: &str) -> Option<Arc<Mutex<CallRecord>>> {
        self.calls
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(call_sid)
            .cloned()
    }

    fn entry_or_insert(&self, call_sid: &str) -> Arc<Mutex<CallRecord>> {
        if let Some(entry) = self.entry(call_sid) {
            return entry;
        }
        self.calls
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(call_sid.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(CallRecord::new(call_sid, CallState::Initiated))))
            .clone()
    }

    fn update<F: FnOnce(&mut CallRecord)>(&self, call_sid: &str, apply: F) -> Option<CallRecord> {
        let entry = self.entry(call_sid)?;
        let mut record = entry.lock().unwrap_or_else(PoisonError::into_inner);
        apply(&mut record);
        record.updated_at = Utc::now();
        Some(record.clone())
    }
}
