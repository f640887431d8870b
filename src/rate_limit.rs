use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use dashmap::DashMap;

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

    /// `Ok` records the hit; `Err` carries how long until the oldest hit leaves the window.
    pub fn check(&self, key: &str, limit: usize, window: Duration) -> Result<(), Duration> {
        self.check_at(key, limit, window, Instant::now())
    }

    fn check_at(&self, key: &str, limit: usize, window: Duration, now: Instant) -> Result<(), Duration> {
        if !self.enabled { return Ok(()); }
        let mut hits = self.store.entry(key.to_string()).or_default();
        hits.retain(|t| now.duration_since(*t) < window);
        if hits.len() < limit {
            hits.push_back(now);
            return Ok(());
        }
        let oldest = hits.front().copied().unwrap_or(now);
        Err(window.saturating_sub(now.duration_since(oldest)))
    }
}

#[derive(Clone, Debug)]
pub struct RateLimitConfig {
    pub upload_limit: usize,
    pub upload_window: Duration,
    pub search_limit: usize,
    pub search_window: Duration,
    pub login_limit: usize,
    pub login_window: Duration,
}

/// Per-action guards keyed by client IP.
#[derive(Clone)]
pub struct RateLimiterFacade {
    pub limiter: InMemoryRateLimiter,
    pub cfg: RateLimitConfig,
}

impl RateLimiterFacade {
    pub fn new(limiter: InMemoryRateLimiter, cfg: RateLimitConfig) -> Self { Self { limiter, cfg } }
    pub fn allow_upload(&self, ip: &str) -> Result<(), Duration> { self.limiter.check(&format!("upload:{ip}"), self.cfg.upload_limit, self.cfg.upload_window) }
    pub fn allow_search(&self, ip: &str) -> Result<(), Duration> { self.limiter.check(&format!("search:{ip}"), self.cfg.search_limit, self.cfg.search_window) }
    pub fn allow_login(&self, ip: &str) -> Result<(), Duration> { self.limiter.check(&format!("login:{ip}"), self.cfg.login_limit, self.cfg.login_window) }
}
