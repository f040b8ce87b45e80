use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

use crate::models::UserId;

/// Sliding window in-memory rate limiter (process local).
#[derive(Clone)]
pub struct InMemoryRateLimiter {
    store: Arc<DashMap<String, VecDeque<Instant>>>,
    pub enabled: bool,
}

impl InMemoryRateLimiter {
    pub fn new(enabled: bool) -> Self {
        Self { store: Arc::new(DashMap::new()), enabled }
    }

    /// `Ok` when allowed; otherwise how long until the oldest hit leaves the window.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> Result<(), Duration> {
        if !self.enabled { return Ok(()); }
        let now = Instant::now();
        let mut entry = self.store.entry(key.to_string()).or_default();
        while let Some(front) = entry.front() {
            if now.duration_since(*front) >= window { entry.pop_front(); } else { break; }
        }
        if entry.len() < limit {
            entry.push_back(now);
            return Ok(());
        }
        let retry = entry
            .front()
            .map(|oldest| window.saturating_sub(now.duration_since(*oldest)))
            .unwrap_or(window);
        Err(retry)
    }
}

/// Per-action limits derived from env.
#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub comment_limit: usize,
    pub comment_window: Duration,
    pub rating_limit: usize,
    pub rating_window: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            comment_limit: 5,
            comment_window: Duration::from_secs(60),
            rating_limit: 20,
            rating_window: Duration::from_secs(60),
        }
    }
}

impl RateLimitConfig {
    pub fn from_env() -> Self {
        fn usize_env(name: &str, default: usize) -> usize { std::env::var(name).ok().and_then(|v| v.parse().ok()).unwrap_or(default) }
        fn dur_env(name: &str, default: Duration) -> Duration {
            std::env::var(name).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs).unwrap_or(default)
        }
        let d = Self::default();
        Self {
            comment_limit: usize_env("RL_COMMENT_LIMIT", d.comment_limit),
            comment_window: dur_env("RL_COMMENT_WINDOW", d.comment_window),
            rating_limit: usize_env("RL_RATING_LIMIT", d.rating_limit),
            rating_window: dur_env("RL_RATING_WINDOW", d.rating_window),
        }
    }
}

/// High level guard used by handlers.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }

    pub fn from_env() -> Self {
        let enabled = std::env::var("RL_ENABLED").map(|v| v != "0" && !v.eq_ignore_ascii_case("false")).unwrap_or(true);
        Self::new(InMemoryRateLimiter::new(enabled), RateLimitConfig::from_env())
    }

    pub fn allow_comment(&self, user: UserId) -> Result<(), Duration> {
        self.limiter.check(&format!("comment:{user}"), self.cfg.comment_limit, self.cfg.comment_window)
    }

    pub fn allow_rating(&self, user: UserId) -> Result<(), Duration> {
        self.limiter.check(&format!("rate:{user}"), self.cfg.rating_limit, self.cfg.rating_window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sliding_window_basic() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(50);
        for _ in 0..3 { assert!(rl.check("k", 3, window).is_ok()); }
        let retry = rl.check("k", 3, window).unwrap_err();
        assert!(retry <= window);
    }

    #[test]
    fn window_expires() {
        let rl = InMemoryRateLimiter::new(true);
        let window = Duration::from_millis(20);
        assert!(rl.check("k", 1, window).is_ok());
        assert!(rl.check("k", 1, window).is_err());
        std::thread::sleep(Duration::from_millis(30));
        assert!(rl.check("k", 1, window).is_ok());
    }

    #[test]
    fn disabled_always_allows() {
        let rl = InMemoryRateLimiter::new(false);
        for _ in 0..100 { assert!(rl.check("k", 1, Duration::from_secs(60)).is_ok()); }
    }

    #[test]
    fn actions_are_keyed_separately() {
        let cfg = RateLimitConfig { comment_limit: 1, rating_limit: 1, ..RateLimitConfig::default() };
        let f = RateLimiterFacade::new(InMemoryRateLimiter::new(true), cfg);
        assert!(f.allow_comment(7).is_ok());
        assert!(f.allow_rating(7).is_ok());
        assert!(f.allow_comment(7).is_err());
        assert!(f.allow_comment(8).is_ok());
    }
}
