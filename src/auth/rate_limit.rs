//! Fixed-window limiter for login attempts, keyed by client address.

use std::sync::Arc;

use dashmap::DashMap;
use time::{Duration, OffsetDateTime};
use tracing::warn;

use crate::config::{RateLimitConfig, MAX_WINDOW_MINUTES};

#[derive(Debug, Clone)]
struct Window {
    started_at: OffsetDateTime,
    attempts: u32,
}

/// Every attempt counts, successful or not, until the window rolls over.
#[derive(Debug, Clone)]
pub struct LoginRateLimiter {
    windows: Arc<DashMap<String, Window>>,
    window: Duration,
    max_attempts: u32,
}

impl LoginRateLimiter {
    pub fn new(window: Duration, max_attempts: u32) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            window,
            max_attempts,
        }
    }

    pub fn from_config(cfg: &RateLimitConfig) -> Self {
        // AppConfig::validate bounds the window; the clamp only guards direct callers.
        let minutes = cfg.window_minutes.min(MAX_WINDOW_MINUTES) as i64;
        Self::new(Duration::minutes(minutes), cfg.max_attempts)
    }

    /// Records one attempt for `key`. Returns the time left in the window when
    /// the attempt is over the limit.
    pub fn hit(&self, key: &str, now: OffsetDateTime) -> Result<(), Duration> {
        // The entry guard holds the shard lock for the whole read-modify-write.
        let mut entry = self.windows.entry(key.to_string()).or_insert_with(|| Window {
            started_at: now,
            attempts: 0,
        });

        if now - entry.started_at >= self.window {
            entry.started_at = now;
            entry.attempts = 0;
        }

        if entry.attempts >= self.max_attempts {
            let retry_after = entry
                .started_at
                .checked_add(self.window)
                .map_or(self.window, |ends_at| ends_at - now);
            warn!(client = %key, attempts = entry.attempts, "login rate limit exceeded");
            return Err(retry_after);
        }

        entry.attempts += 1;
        Ok(())
    }

    pub fn attempts(&self, key: &str) -> u32 {
        self.windows.get(key).map(|w| w.attempts).unwrap_or(0)
    }

    /// Drops windows that have fully elapsed.
    pub fn cleanup(&self, now: OffsetDateTime) {
        self.windows
            .retain(|_, w| now - w.started_at < self.window);
    }
}
