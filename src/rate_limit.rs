//! # Outbound Call Rate Limiting
//!
//! Sliding window per caller key: a caller may place at most `limit` calls in
//! any `window_minutes` span. Each key keeps the timestamps of its accepted
//! calls, oldest first; timestamps that fell out of the window are dropped on
//! every look.
//!
//! Keys with no calls left in the window are swept every tenth check so the
//! map does not grow with one-off callers.

use crate::config::RateLimitConfig;
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tracing::debug;

const CLEANUP_EVERY: u64 = 10;

/// Where a caller stands against the limit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RateLimitStatus {
    pub limit: usize,
    pub window_minutes: u64,
    pub current_count: usize,
    pub remaining: usize,
    /// When the oldest call in the window expires (now if there is none).
    pub reset_time: DateTime<Utc>,
    pub can_make_call: bool,
}

impl RateLimitStatus {
    /// Whole seconds until another call is allowed, at least one.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.reset_time - now).num_seconds().max(1)
    }
}

pub struct RateLimiter {
    limit: usize,
    window_minutes: u64,
    window: Duration,
    calls: Mutex<HashMap<String, VecDeque<DateTime<Utc>>>>,
    checks: AtomicU64,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            limit: config.calls,
            window_minutes: config.window_minutes,
            window: Duration::minutes(config.window_minutes as i64),
            calls: Mutex::new(HashMap::new()),
            checks: AtomicU64::new(0),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn window_minutes(&self) -> u64 {
        self.window_minutes
    }

    /// Keys that currently hold at least one timestamp.
    pub fn active_keys(&self) -> usize {
        self.lock().len()
    }

    /// Record a call for `key` if the limit allows it. `Err` carries the
    /// status of a rejected caller.
    pub fn check(&self, key: &str) -> Result<RateLimitStatus, RateLimitStatus> {
        self.check_at(key, Utc::now())
    }

    pub fn check_at(&self, key: &str, now: DateTime<Utc>) -> Result<RateLimitStatus, RateLimitStatus> {
        if self.checks.fetch_add(1, Ordering::Relaxed) % CLEANUP_EVERY == 0 {
            self.cleanup_at(now);
        }

        let mut calls = self.lock();
        let timestamps = calls.entry(key.to_string()).or_default();
        self.expire(timestamps, now);

        if timestamps.len() >= self.limit {
            let status = self.status_of(timestamps, now);
            debug!(key = %key, count = status.current_count, "Rate limit exceeded");
            return Err(status);
        }

        timestamps.push_back(now);
        Ok(self.status_of(timestamps, now))
    }

    /// Current standing without consuming a call.
    pub fn status(&self, key: &str) -> RateLimitStatus {
        self.status_at(key, Utc::now())
    }

    pub fn status_at(&self, key: &str, now: DateTime<Utc>) -> RateLimitStatus {
        let mut calls = self.lock();
        match calls.get_mut(key) {
            Some(timestamps) => {
                self.expire(timestamps, now);
                self.status_of(timestamps, now)
            }
            None => self.status_of(&VecDeque::new(), now),
        }
    }

    /// Drop expired timestamps everywhere and forget keys left empty.
    pub fn cleanup_at(&self, now: DateTime<Utc>) {
        let mut calls = self.lock();
        for timestamps in calls.values_mut() {
            self.expire(timestamps, now);
        }
        calls.retain(|_, timestamps| !timestamps.is_empty());
        debug!(active_keys = calls.len(), "Rate limit cleanup completed");
    }

    fn expire(&self, timestamps: &mut VecDeque<DateTime<Utc>>, now: DateTime<Utc>) {
        let cutoff = now - self.window;
        while timestamps.front().is_some_and(|oldest| *oldest < cutoff) {
            timestamps.pop_front();
        }
    }

    fn status_of(&self, timestamps: &VecDeque<DateTime<Utc>>, now: DateTime<Utc>) -> RateLimitStatus {
        let current_count = timestamps.len();
        RateLimitStatus {
            limit: self.limit,
            window_minutes: self.window_minutes,
            current_count,
            remaining: self.limit.saturating_sub(current_count),
            reset_time: timestamps.front().map_or(now, |oldest| *oldest + self.window),
            can_make_call: current_count < self.limit,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, VecDeque<DateTime<Utc>>>> {
        self.calls.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> RateLimiter {
        RateLimiter::new(&RateLimitConfig::default())
    }

    #[test]
    fn test_limit_reached_after_five_calls() {
        let limiter = limiter();
        let now = Utc::now();

        for expected_remaining in (0..5).rev() {
            let status = limiter.check_at("session-a", now).unwrap();
            assert_eq!(status.remaining, expected_remaining);
        }

        let rejected = limiter.check_at("session-a", now).unwrap_err();
        assert_eq!(rejected.current_count, 5);
        assert_eq!(rejected.remaining, 0);
        assert!(!rejected.can_make_call);
        assert_eq!(rejected.reset_time, now + Duration::minutes(5));
        assert_eq!(rejected.retry_after_secs(now), 300);
    }

    #[test]
    fn test_window_slides() {
        let limiter = limiter();
        let start = Utc::now();

        for i in 0..5 {
            limiter.check_at("k", start + Duration::seconds(i * 30)).unwrap();
        }
        assert!(limiter.check_at("k", start + Duration::minutes(4)).is_err());

        // Only the first call has aged out.
        let later = start + Duration::minutes(5) + Duration::seconds(1);
        let status = limiter.check_at("k", later).unwrap();
        assert_eq!(status.current_count, 5);
        assert!(limiter.check_at("k", later).is_err());
    }

    #[test]
    fn test_keys_are_independent() {
        let limiter = limiter();
        let now = Utc::now();
        for _ in 0..5 {
            limiter.check_at("a", now).unwrap();
        }
        assert!(limiter.check_at("a", now).is_err());
        assert!(limiter.check_at("b", now).is_ok());
    }

    #[test]
    fn test_status_does_not_consume() {
        let limiter = limiter();
        let now = Utc::now();
        limiter.check_at("a", now).unwrap();

        for _ in 0..10 {
            let status = limiter.status_at("a", now);
            assert_eq!(status.current_count, 1);
            assert_eq!(status.remaining, 4);
            assert!(status.can_make_call);
        }

        let fresh = limiter.status_at("never-seen", now);
        assert_eq!(fresh.current_count, 0);
        assert_eq!(fresh.reset_time, now);
        assert_eq!(limiter.active_keys(), 1);
    }

    #[test]
    fn test_cleanup_forgets_idle_keys() {
        let limiter = limiter();
        let start = Utc::now();
        limiter.check_at("old", start).unwrap();
        limiter.check_at("recent", start + Duration::minutes(4)).unwrap();

        limiter.cleanup_at(start + Duration::minutes(6));
        assert_eq!(limiter.active_keys(), 1);
        assert_eq!(limiter.status_at("recent", start + Duration::minutes(6)).current_count, 1);
    }
}
