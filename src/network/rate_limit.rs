//! Rate Limiting
//!
//! Fixed-window limiter: each key may consume `points` within every
//! `duration` window. The window starts at the first consumption and resets
//! once it has elapsed.

use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::network::router::{middleware, HandlerError, Middleware, Next};

/// Events per second allowed per session by default.
pub const DEFAULT_POINTS: u32 = 20;
/// Default window length.
pub const DEFAULT_DURATION: Duration = Duration::from_secs(1);

/// Rate limiter configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RateLimitConfig {
    /// When false every consumption succeeds.
    pub enabled: bool,
    /// Points available per window.
    pub points: u32,
    /// Window length.
    pub duration: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            points: DEFAULT_POINTS,
            duration: DEFAULT_DURATION,
        }
    }
}

impl RateLimitConfig {
    /// A configuration that never limits.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Parse `"points/seconds"` (e.g. `"20/1"`) or `"off"`.
    pub fn parse(value: &str) -> Result<Self, RateLimitError> {
        let value = value.trim();
        if value.eq_ignore_ascii_case("off") {
            return Ok(Self::disabled());
        }

        let invalid = || RateLimitError::InvalidConfig(value.to_string());
        let (points, seconds) = value.split_once('/').ok_or_else(invalid)?;
        let points: u32 = points.trim().parse().map_err(|_| invalid())?;
        let seconds: f64 = seconds.trim().parse().map_err(|_| invalid())?;
        if points == 0 {
            return Err(invalid());
        }
        let duration = Duration::try_from_secs_f64(seconds).map_err(|_| invalid())?;
        if duration.is_zero() {
            return Err(invalid());
        }

        Ok(Self {
            enabled: true,
            points,
            duration,
        })
    }
}

/// Rate limiter errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RateLimitError {
    /// Key has used up its window.
    #[error("rate limit exceeded for {key}, retry in {retry_after:?}")]
    Exceeded {
        /// Rendered key.
        key: String,
        /// Time until the window resets.
        retry_after: Duration,
    },

    /// Configuration string did not parse.
    #[error("invalid rate limit \"{0}\", expected \"points/seconds\" or \"off\"")]
    InvalidConfig(String),
}

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    consumed: u32,
}

/// Fixed-window rate limiter keyed by `K`.
pub struct RateLimiter<K> {
    config: RateLimitConfig,
    windows: Mutex<HashMap<K, Window>>,
}

impl<K> RateLimiter<K>
where
    K: Hash + Eq + Clone + fmt::Display,
{
    /// Create a limiter.
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Active configuration.
    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    /// Consume `points` for `key`; returns the points left in the window.
    pub fn consume(&self, key: &K, points: u32) -> Result<u32, RateLimitError> {
        if !self.config.enabled {
            return Ok(self.config.points);
        }

        let now = Instant::now();
        let mut windows = self.windows.lock();
        let window = windows.entry(key.clone()).or_insert(Window {
            started: now,
            consumed: 0,
        });

        if now.duration_since(window.started) >= self.config.duration {
            *window = Window {
                started: now,
                consumed: 0,
            };
        }

        let consumed = window.consumed.saturating_add(points);
        if consumed > self.config.points {
            let retry_after = self.config.duration.saturating_sub(now.duration_since(window.started));
            debug!(key = %key, ?retry_after, "rate limited");
            return Err(RateLimitError::Exceeded {
                key: key.to_string(),
                retry_after,
            });
        }

        window.consumed = consumed;
        Ok(self.config.points - consumed)
    }

    /// Forget a key (e.g. when its session closes).
    pub fn reset(&self, key: &K) {
        self.windows.lock().remove(key);
    }

    /// Drop windows that have already expired.
    pub fn prune(&self) {
        let now = Instant::now();
        let duration = self.config.duration;
        self.windows
            .lock()
            .retain(|_, window| now.duration_since(window.started) < duration);
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.lock().len()
    }
}

/// Router middleware that charges one point per event to the key derived
/// from the context, rejecting the event once the key is over budget.
pub fn rate_limit_middleware<C, K, F>(limiter: Arc<RateLimiter<K>>, key: F) -> Middleware<C>
where
    C: Send + 'static,
    K: Hash + Eq + Clone + fmt::Display + Send + 'static,
    F: Fn(&C) -> K + Send + Sync + 'static,
{
    middleware(move |ctx: C, next: Next<C>| {
        let verdict = limiter.consume(&key(&ctx), 1);
        async move {
            match verdict {
                Ok(_) => next.run(ctx).await,
                Err(err) => Err(HandlerError::from(anyhow::Error::new(err))),
            }
        }
    })
}

// =============================================================================
// TESTS
// =============================================================================
