//! Rate Limiting Infrastructure
//!
//! Limit configuration, decision type, and a volatile fixed-window counter.
//!
//! The fixed window is an approximation: a burst straddling a window
//! boundary can be admitted up to `2 × limit` times within one `window`.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

/// Rejected limit configuration
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RateLimitConfigError {
    #[error("rate limit must be greater than zero")]
    ZeroLimit,
    #[error("rate limit window must be greater than zero")]
    ZeroWindow,
}

/// Rate limit configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// Maximum requests admitted per window
    limit: u32,
    window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            limit: 100,
            window: Duration::from_secs(1),
        }
    }
}

impl RateLimitConfig {
    pub fn new(limit: u32, window_secs: u64) -> Result<Self, RateLimitConfigError> {
        Self::with_window(limit, Duration::from_secs(window_secs))
    }

    pub fn with_window(limit: u32, window: Duration) -> Result<Self, RateLimitConfigError> {
        if limit == 0 {
            return Err(RateLimitConfigError::ZeroLimit);
        }
        if window.is_zero() {
            return Err(RateLimitConfigError::ZeroWindow);
        }
        Ok(Self { limit, window })
    }

    pub fn limit(&self) -> u32 {
        self.limit
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn window_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window).unwrap_or(chrono::Duration::MAX)
    }

    /// `from + window`, saturating at the latest representable instant.
    pub fn window_end(&self, from: DateTime<Utc>) -> DateTime<Utc> {
        from.checked_add_signed(self.window_chrono())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

/// Rate limit check result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitResult {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl RateLimitResult {
    /// Whole seconds until `reset_at`, rounded up, at least 1.
    pub fn retry_after_secs(&self, now: DateTime<Utc>) -> u64 {
        let millis = (self.reset_at - now).num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Per-key state of the fixed-window counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterState {
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Windows {
    counters: HashMap<String, CounterState>,
    next_sweep_at: Option<DateTime<Utc>>,
}

/// Volatile fixed-window counter.
///
/// All mutation of one key happens under a single lock, so concurrent calls
/// for the same key observe strictly increasing counts.
#[derive(Debug, Default)]
pub struct FixedWindowCounter {
    windows: Mutex<Windows>,
}

impl FixedWindowCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one request for `key` against `config` at the current time.
    pub fn check(&self, key: &str, config: &RateLimitConfig) -> RateLimitResult {
        self.check_at(key, config, Utc::now())
    }

    pub fn check_at(
        &self,
        key: &str,
        config: &RateLimitConfig,
        now: DateTime<Utc>,
    ) -> RateLimitResult {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.next_sweep_at.is_none_or(|at| now >= at) {
            windows.counters.retain(|_, state| state.window_reset_at > now);
            windows.next_sweep_at = Some(config.window_end(now));
        }

        let state = windows
            .counters
            .entry(key.to_string())
            .or_insert(CounterState {
                count: 0,
                window_reset_at: config.window_end(now),
            });

        if now >= state.window_reset_at {
            *state = CounterState {
                count: 0,
                window_reset_at: config.window_end(now),
            };
        }

        state.count = state.count.saturating_add(1);

        RateLimitResult {
            allowed: state.count <= config.limit(),
            remaining: config.limit().saturating_sub(state.count),
            reset_at: state.window_reset_at,
        }
    }

    /// Forget the window for `key`.
    pub fn reset(&self, key: &str) {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counters
            .remove(key);
    }

    pub fn state(&self, key: &str) -> Option<CounterState> {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counters
            .get(key)
            .copied()
    }

    /// Number of keys currently tracked (including not-yet-swept expired ones).
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .counters
            .len()
    }
}
