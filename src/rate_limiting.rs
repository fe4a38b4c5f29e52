// ABOUTME: Fixed-window rate limiting service keyed by opaque identifiers
// ABOUTME: Sharded DashMap counters with an injected clock so tests control time deterministically
//
// Licensed under either of Apache License, Version 2.0 or MIT License at your option.
// Copyright ©2025 Gatehouse Labs

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Source of "now" for rate-limit windows
///
/// Production uses [`SystemClock`]; tests inject [`ManualClock`] to step
/// through window boundaries without sleeping.
pub trait Clock: Send + Sync {
    /// Current wall-clock time
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock backed [`Clock`]
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually advanced [`Clock`] for deterministic tests
#[derive(Debug)]
pub struct ManualClock {
    now: std::sync::Mutex<DateTime<Utc>>,
}

impl ManualClock {
    /// Create a clock frozen at `start`
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: std::sync::Mutex::new(start),
        }
    }

    /// Advance the clock by `delta`
    pub fn advance(&self, delta: Duration) {
        if let Ok(mut now) = self.now.lock() {
            *now += delta;
        }
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        self.now.lock().map_or_else(|e| *e.into_inner(), |now| *now)
    }
}

/// Per-identifier rate limit policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    /// Requests allowed per window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: i64,
    /// When false, every check is allowed
    pub enabled: bool,
}

impl RateLimitPolicy {
    /// Create an enabled policy
    #[must_use]
    pub const fn new(max_requests: u32, window_ms: i64) -> Self {
        Self {
            max_requests,
            window_ms,
            enabled: true,
        }
    }

    /// Policy that never limits
    #[must_use]
    pub const fn disabled() -> Self {
        Self {
            max_requests: 0,
            window_ms: 0,
            enabled: false,
        }
    }
}

impl Default for RateLimitPolicy {
    fn default() -> Self {
        Self::new(100, 60_000)
    }
}

/// Outcome of a rate-limit check
#[derive(Debug, Clone, Copy, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// Requests left in the current window
    pub remaining: u32,
    /// When the current window resets
    pub reset_at: DateTime<Utc>,
    /// The window's request budget
    pub limit: u32,
}

#[derive(Debug, Clone, Copy)]
struct WindowState {
    count: u32,
    window_start: DateTime<Utc>,
}

/// Fixed-window counter service keyed by opaque identifiers
///
/// `check` reads the current window; `record` charges a request to it. The
/// split mirrors the protocol engine's needs (check before work, record
/// after the outcome is known) and bounds the concurrent-check race at the
/// number of in-flight requests per identifier. A distributed deployment
/// would need an atomic counter store behind the same interface.
pub struct FixedWindowLimiter {
    windows: DashMap<String, WindowState>,
    clock: Arc<dyn Clock>,
    /// Lazy cleanup kicks in once the map grows past this many identifiers
    cleanup_threshold: usize,
}

impl FixedWindowLimiter {
    /// Create a limiter over the given clock
    #[must_use]
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            windows: DashMap::new(),
            clock,
            cleanup_threshold: 10_000,
        }
    }

    /// Check the current window for `identifier` without charging it
    #[must_use]
    pub fn check(&self, identifier: &str, policy: &RateLimitPolicy) -> RateLimitDecision {
        let now = self.clock.now();
        let window = Duration::milliseconds(policy.window_ms);

        if !policy.enabled {
            return RateLimitDecision {
                allowed: true,
                remaining: policy.max_requests,
                reset_at: now + window,
                limit: policy.max_requests,
            };
        }

        let mut entry = self
            .windows
            .entry(identifier.to_owned())
            .or_insert(WindowState {
                count: 0,
                window_start: now,
            });

        // Window resets strictly after window_ms from window start
        if now - entry.window_start >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        let state = *entry.value();
        drop(entry);

        RateLimitDecision {
            allowed: state.count < policy.max_requests,
            remaining: policy.max_requests.saturating_sub(state.count),
            reset_at: state.window_start + window,
            limit: policy.max_requests,
        }
    }

    /// Charge one request against `identifier`'s current window
    ///
    /// Both successes and failures consume window budget; `success` is
    /// recorded for tracing only.
    pub fn record(&self, identifier: &str, success: bool, policy: &RateLimitPolicy) {
        if !policy.enabled {
            return;
        }

        let now = self.clock.now();
        let window = Duration::milliseconds(policy.window_ms);

        let mut entry = self
            .windows
            .entry(identifier.to_owned())
            .or_insert(WindowState {
                count: 0,
                window_start: now,
            });

        if now - entry.window_start >= window {
            entry.count = 0;
            entry.window_start = now;
        }

        entry.count += 1;
        let count = entry.count;
        drop(entry);

        tracing::trace!(identifier, success, count, "rate limit window charged");

        if self.windows.len() > self.cleanup_threshold {
            self.cleanup_stale(now, window);
        }
    }

    /// Drop identifiers whose window ended more than one window ago
    fn cleanup_stale(&self, now: DateTime<Utc>, window: Duration) {
        self.windows
            .retain(|_, state| now - state.window_start < window * 2);
    }
}

/// Identifier for per-credential, per-operation limits
#[must_use]
pub fn client_operation_key(client_id: &str, operation: &str) -> String {
    format!("{client_id}:{operation}")
}

/// Identifier for coarse per-user limits
#[must_use]
pub fn user_key(user_id: Uuid) -> String {
    format!("user:{user_id}")
}

/// Identifier for coarse per-IP limits
#[must_use]
pub fn global_ip_key(ip: &str) -> String {
    format!("global:{ip}")
}
