/*!
 * # Rate Limiting Module
 *
 * Fixed-window rate limiter used to cap outbound notification sends per
 * delivery channel. Keys are channel names (optionally suffixed with a
 * recipient), entries live in an in-memory concurrent map.
 */

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum RateLimitError {
    #[error("Rate limit exceeded")]
    LimitExceeded,
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, Clone)]
struct RateLimitEntry {
    count: u32,
    window_start: Instant,
    last_request: Instant,
}

impl RateLimitEntry {
    fn new() -> Self {
        let now = Instant::now();
        Self {
            count: 1,
            window_start: now,
            last_request: now,
        }
    }

    fn increment(&mut self, window_duration: Duration) {
        let now = Instant::now();

        // Reset if window has expired
        if now.duration_since(self.window_start) >= window_duration {
            self.count = 1;
            self.window_start = now;
        } else {
            self.count += 1;
        }

        self.last_request = now;
    }

    fn is_allowed(&self, limit: u32, window_duration: Duration) -> bool {
        let now = Instant::now();

        // If window has expired, allow the request
        if now.duration_since(self.window_start) >= window_duration {
            return true;
        }

        self.count < limit
    }

    fn time_until_reset(&self, window_duration: Duration) -> Duration {
        let elapsed = self.last_request.duration_since(self.window_start);
        if elapsed >= window_duration {
            Duration::from_secs(0)
        } else {
            window_duration - elapsed
        }
    }
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub requests_per_window: u32,
    pub window_duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_window: 30,
            window_duration: Duration::from_secs(60),
        }
    }
}

#[derive(Clone)]
pub struct RateLimiter {
    entries: Arc<DashMap<String, RateLimitEntry>>,
    config: RateLimitConfig,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            config,
        }
    }

    /// Attempt to take one send slot for `key`.
    ///
    /// Counting and window rollover happen under the map shard lock, so two
    /// racing callers cannot both take the last slot.
    pub fn try_acquire(&self, key: &str) -> Result<(), RateLimitError> {
        match self.entries.entry(key.to_string()) {
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                // First acquisition opens the window and counts itself.
                vacant.insert(RateLimitEntry::new());
                Ok(())
            }
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let entry = occupied.get_mut();
                if !entry.is_allowed(self.config.requests_per_window, self.config.window_duration)
                {
                    let retry_after = entry.time_until_reset(self.config.window_duration);
                    debug!(key, ?retry_after, "rate limit exceeded");
                    return Err(RateLimitError::LimitExceeded);
                }
                entry.increment(self.config.window_duration);
                Ok(())
            }
        }
    }

    /// Seconds until the window for `key` resets, if the key is tracked.
    pub fn retry_after(&self, key: &str) -> Option<Duration> {
        self.entries
            .get(key)
            .map(|e| e.time_until_reset(self.config.window_duration))
    }

    /// Drop entries whose window expired long ago. Called opportunistically.
    pub fn prune(&self) {
        let window = self.config.window_duration;
        self.entries
            .retain(|_, entry| entry.last_request.elapsed() < window * 2);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(limit: u32, window_secs: u64) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            requests_per_window: limit,
            window_duration: Duration::from_secs(window_secs),
        })
    }

    #[test]
    fn allows_up_to_limit_then_rejects() {
        let rl = limiter(3, 60);
        assert!(rl.try_acquire("chat").is_ok());
        assert!(rl.try_acquire("chat").is_ok());
        assert!(rl.try_acquire("chat").is_ok());
        assert!(matches!(
            rl.try_acquire("chat"),
            Err(RateLimitError::LimitExceeded)
        ));
    }

    #[test]
    fn keys_are_independent() {
        let rl = limiter(1, 60);
        assert!(rl.try_acquire("chat").is_ok());
        assert!(rl.try_acquire("messaging").is_ok());
        assert!(rl.try_acquire("chat").is_err());
    }

    #[test]
    fn window_expiry_resets_budget() {
        let rl = limiter(1, 0);
        assert!(rl.try_acquire("chat").is_ok());
        // Zero-length window expires immediately.
        assert!(rl.try_acquire("chat").is_ok());
    }

    #[test]
    fn retry_after_reported_for_tracked_keys() {
        let rl = limiter(1, 60);
        assert!(rl.retry_after("chat").is_none());
        rl.try_acquire("chat").unwrap();
        assert!(rl.retry_after("chat").unwrap() <= Duration::from_secs(60));
    }
}
