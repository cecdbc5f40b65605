use crate::clock::{deadline_ms, duration_ms, system_clock, Clock};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests allowed per window.
    pub requests: u32,
    /// Window length.
    #[serde(rename = "window_seconds", with = "window_secs")]
    pub window: Duration,
}

mod window_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}

impl RateLimitConfig {
    pub fn new(requests: u32, window: Duration) -> Self {
        Self { requests, window }
    }

    pub fn per_minute(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(60))
    }

    pub fn per_second(requests: u32) -> Self {
        Self::new(requests, Duration::from_secs(1))
    }

    fn window_ms(&self) -> u64 {
        duration_ms(self.window)
    }

    /// Windows are tracked per (identifier, config) pair.
    fn bucket_key(&self, identifier: &str) -> String {
        format!("{}/{}:{}", self.requests, self.window_ms(), identifier)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::per_minute(100)
    }
}

/// Outcome of a single [`FixedWindowLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub limit: u32,
    pub remaining: u32,
    /// When the current window closes, in epoch milliseconds.
    pub reset_at_ms: u64,
}

impl RateLimitDecision {
    /// Whole seconds until the window resets, at least 1.
    pub fn retry_after_secs(&self, now_ms: u64) -> u64 {
        let wait = self.reset_at_ms.saturating_sub(now_ms);
        wait.div_ceil(1000).max(1)
    }
}

#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub identifier: String,
    pub limit: u32,
    pub count: u32,
    pub window_start_ms: Option<u64>,
    pub reset_at_ms: u64,
}

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    window_start: u64,
    window_ms: u64,
    count: u32,
}

impl RateWindow {
    fn closes_at(&self) -> u64 {
        self.window_start.saturating_add(self.window_ms)
    }

    fn is_open(&self, now: u64) -> bool {
        now < self.closes_at()
    }
}

struct WindowTable {
    windows: HashMap<String, RateWindow>,
    /// Map size that triggers the next sweep of closed windows.
    sweep_at: usize,
}

impl WindowTable {
    fn sweep(&mut self, now: u64) -> usize {
        let before = self.windows.len();
        self.windows.retain(|_, w| w.is_open(now));
        before - self.windows.len()
    }
}

/// Fixed-window request counter keyed by caller identity.
///
/// - A window opens on the first request and lasts exactly `window`
/// - Rejected requests never consume quota
/// - Bursts of up to twice the quota are possible across a window boundary
/// - Closed windows are swept whenever the map reaches its sweep threshold,
///   so memory tracks the number of open windows rather than every caller seen
pub struct FixedWindowLimiter {
    table: Mutex<WindowTable>,
    sweep_threshold: usize,
    clock: Arc<dyn Clock>,
}

impl FixedWindowLimiter {
    pub const DEFAULT_SWEEP_THRESHOLD: usize = 1024;

    pub fn new() -> Self {
        Self::with_clock(system_clock())
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(WindowTable {
                windows: HashMap::new(),
                sweep_at: Self::DEFAULT_SWEEP_THRESHOLD,
            }),
            sweep_threshold: Self::DEFAULT_SWEEP_THRESHOLD,
            clock,
        }
    }

    pub fn with_sweep_threshold(mut self, threshold: usize) -> Self {
        let threshold = threshold.max(1);
        self.sweep_threshold = threshold;
        self.table.get_mut().sweep_at = threshold;
        self
    }

    /// Consume one request from `identifier`'s quota if any is left.
    pub async fn is_allowed(&self, identifier: &str, config: &RateLimitConfig) -> bool {
        self.check(identifier, config).await.allowed
    }

    /// Evaluate and report in one step, so the returned counters match the decision.
    pub async fn check(&self, identifier: &str, config: &RateLimitConfig) -> RateLimitDecision {
        let now = self.clock.now_ms();
        let window_ms = config.window_ms();
        let mut table = self.table.lock().await;
        if table.windows.len() >= table.sweep_at {
            let swept = table.sweep(now);
            table.sweep_at = self.sweep_threshold.max(table.windows.len() * 2);
            debug!(swept, tracked = table.windows.len(), "swept closed rate-limit windows");
        }
        let window = table
            .windows
            .entry(config.bucket_key(identifier))
            .or_insert(RateWindow {
                window_start: now,
                window_ms,
                count: 0,
            });
        if !window.is_open(now) {
            window.window_start = now;
            window.count = 0;
        }

        let allowed = window.count < config.requests;
        if allowed {
            window.count += 1;
        }
        RateLimitDecision {
            allowed,
            limit: config.requests,
            remaining: config.requests.saturating_sub(window.count),
            reset_at_ms: window.closes_at(),
        }
    }

    /// Requests left in the current window, without consuming any.
    pub async fn remaining_requests(&self, identifier: &str, config: &RateLimitConfig) -> u32 {
        let now = self.clock.now_ms();
        let table = self.table.lock().await;
        match table.windows.get(&config.bucket_key(identifier)) {
            Some(w) if w.is_open(now) => {
                config.requests.saturating_sub(w.count)
            }
            _ => config.requests,
        }
    }

    /// When the current window closes (epoch ms); `now + window` if none is open.
    pub async fn reset_time(&self, identifier: &str, config: &RateLimitConfig) -> u64 {
        let now = self.clock.now_ms();
        let table = self.table.lock().await;
        match table.windows.get(&config.bucket_key(identifier)) {
            Some(w) if w.is_open(now) => w.closes_at(),
            _ => deadline_ms(now, config.window),
        }
    }

    pub async fn snapshot(&self, identifier: &str, config: &RateLimitConfig) -> RateLimiterSnapshot {
        let now = self.clock.now_ms();
        let table = self.table.lock().await;
        let open = table
            .windows
            .get(&config.bucket_key(identifier))
            .filter(|w| w.is_open(now));
        RateLimiterSnapshot {
            identifier: identifier.to_string(),
            limit: config.requests,
            count: open.map(|w| w.count).unwrap_or(0),
            window_start_ms: open.map(|w| w.window_start),
            reset_at_ms: open.map(|w| w.closes_at()).unwrap_or_else(|| deadline_ms(now, config.window)),
        }
    }

    /// Drop windows that have already closed. Returns the number dropped.
    pub async fn cleanup_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.table.lock().await.sweep(now)
    }

    /// Number of tracked windows, open or not.
    pub async fn len(&self) -> usize {
        self.table.lock().await.windows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        let mut table = self.table.lock().await;
        table.windows.clear();
        table.sweep_at = self.sweep_threshold;
    }
}

impl Default for FixedWindowLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn limiter() -> (FixedWindowLimiter, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        (FixedWindowLimiter::with_clock(clock.clone()), clock)
    }

    #[test]
    fn test_rate_limit_config_helpers() {
        assert_eq!(RateLimitConfig::per_minute(3).window, Duration::from_secs(60));
        assert_eq!(RateLimitConfig::per_second(5).requests, 5);
        assert_eq!(RateLimitConfig::default().requests, 100);
    }

    #[test]
    fn test_rate_limit_config_deserializes_seconds() {
        let cfg: RateLimitConfig =
            serde_json::from_str(r#"{"requests": 10, "window_seconds": 30}"#).unwrap();
        assert_eq!(cfg, RateLimitConfig::new(10, Duration::from_secs(30)));
    }

    #[tokio::test]
    async fn test_quota_then_reset() {
        let (limiter, clock) = limiter();
        let cfg = RateLimitConfig::per_minute(3);

        assert!(limiter.is_allowed("a", &cfg).await);
        assert!(limiter.is_allowed("a", &cfg).await);
        assert!(limiter.is_allowed("a", &cfg).await);
        assert!(!limiter.is_allowed("a", &cfg).await);

        clock.advance(Duration::from_secs(61));
        assert!(limiter.is_allowed("a", &cfg).await);
        assert_eq!(limiter.remaining_requests("a", &cfg).await, 2);
    }

    #[tokio::test]
    async fn test_rejection_does_not_consume() {
        let (limiter, _) = limiter();
        let cfg = RateLimitConfig::per_minute(1);
        let first = limiter.check("a", &cfg).await;
        assert!(first.allowed);
        assert_eq!(first.remaining, 0);

        for _ in 0..5 {
            let d = limiter.check("a", &cfg).await;
            assert!(!d.allowed);
            assert_eq!(d.remaining, 0);
        }
        assert_eq!(limiter.snapshot("a", &cfg).await.count, 1);
    }

    #[tokio::test]
    async fn test_window_boundary_is_exact() {
        let (limiter, clock) = limiter();
        let cfg = RateLimitConfig::per_minute(1);
        let start = clock.now_ms();
        assert!(limiter.is_allowed("a", &cfg).await);
        assert_eq!(limiter.reset_time("a", &cfg).await, start + 60_000);

        clock.advance(Duration::from_millis(59_999));
        assert!(!limiter.is_allowed("a", &cfg).await);
        clock.advance(Duration::from_millis(1));
        assert!(limiter.is_allowed("a", &cfg).await);
        assert_eq!(limiter.reset_time("a", &cfg).await, start + 120_000);
    }

    #[tokio::test]
    async fn test_identifiers_are_independent() {
        let (limiter, _) = limiter();
        let cfg = RateLimitConfig::per_minute(2);
        assert!(limiter.is_allowed("a", &cfg).await);
        assert!(limiter.is_allowed("a", &cfg).await);
        assert!(!limiter.is_allowed("a", &cfg).await);
        assert!(limiter.is_allowed("b", &cfg).await);
        assert_eq!(limiter.remaining_requests("b", &cfg).await, 1);
    }

    #[tokio::test]
    async fn test_configs_are_independent() {
        let (limiter, _) = limiter();
        let strict = RateLimitConfig::per_minute(1);
        let loose = RateLimitConfig::per_minute(10);
        assert!(limiter.is_allowed("a", &strict).await);
        assert!(!limiter.is_allowed("a", &strict).await);
        assert!(limiter.is_allowed("a", &loose).await);
        assert_eq!(limiter.len().await, 2);
    }

    #[tokio::test]
    async fn test_queries_without_window() {
        let (limiter, clock) = limiter();
        let cfg = RateLimitConfig::new(5, Duration::from_secs(10));
        assert_eq!(limiter.remaining_requests("nobody", &cfg).await, 5);
        assert_eq!(limiter.reset_time("nobody", &cfg).await, clock.now_ms() + 10_000);
        assert!(limiter.is_empty().await);
    }

    #[tokio::test]
    async fn test_retry_after_rounds_up() {
        let (limiter, clock) = limiter();
        let cfg = RateLimitConfig::new(1, Duration::from_secs(10));
        limiter.check("a", &cfg).await;
        clock.advance(Duration::from_millis(8_500));
        let d = limiter.check("a", &cfg).await;
        assert!(!d.allowed);
        assert_eq!(d.retry_after_secs(clock.now_ms()), 2);
        assert_eq!(d.retry_after_secs(d.reset_at_ms + 5), 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired() {
        let (limiter, clock) = limiter();
        let short = RateLimitConfig::new(1, Duration::from_secs(1));
        let long = RateLimitConfig::new(1, Duration::from_secs(60));
        limiter.is_allowed("a", &short).await;
        limiter.is_allowed("b:with:colons", &long).await;
        clock.advance(Duration::from_secs(2));
        assert_eq!(limiter.cleanup_expired().await, 1);
        assert_eq!(limiter.len().await, 1);
        limiter.clear().await;
        assert!(limiter.is_empty().await);
    }

    #[tokio::test]
    async fn test_closed_windows_are_swept_on_check() {
        let (limiter, clock) = limiter();
        let limiter = limiter.with_sweep_threshold(100);
        let cfg = RateLimitConfig::per_second(1);
        for i in 0..5_000 {
            assert!(limiter.is_allowed(&format!("client-{i}"), &cfg).await);
            clock.advance(Duration::from_millis(1_001));
        }
        assert!(limiter.len().await <= 100);
    }

    #[tokio::test]
    async fn test_open_windows_survive_sweep() {
        let (limiter, clock) = limiter();
        let limiter = limiter.with_sweep_threshold(4);
        let long = RateLimitConfig::per_minute(1);
        let short = RateLimitConfig::per_second(1);
        assert!(limiter.is_allowed("keeper", &long).await);
        for i in 0..10 {
            limiter.is_allowed(&format!("drive-by-{i}"), &short).await;
            clock.advance(Duration::from_millis(1_001));
        }
        assert!(!limiter.is_allowed("keeper", &long).await);
    }

    #[tokio::test]
    async fn test_huge_window_saturates() {
        let (limiter, clock) = limiter();
        let cfg = RateLimitConfig::new(1, Duration::from_secs(18_446_744_073_709_551));
        let d = limiter.check("a", &cfg).await;
        assert!(d.allowed);
        assert_eq!(d.reset_at_ms, u64::MAX);
        assert!(!limiter.is_allowed("a", &cfg).await);
        assert_eq!(limiter.reset_time("nobody", &cfg).await, u64::MAX);
        assert_eq!(limiter.snapshot("a", &cfg).await.count, 1);
        clock.advance(Duration::from_secs(3600));
        assert_eq!(limiter.cleanup_expired().await, 0);
    }

    #[tokio::test]
    async fn test_concurrent_checks_never_exceed_quota() {
        let (limiter, _) = limiter();
        let limiter = Arc::new(limiter);
        let cfg = RateLimitConfig::per_minute(25);

        let mut handles = vec![];
        for _ in 0..10 {
            let l = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move {
                let mut allowed = 0;
                for _ in 0..10 {
                    if l.is_allowed("shared", &cfg).await {
                        allowed += 1;
                    }
                }
                allowed
            }));
        }
        let mut total = 0;
        for h in handles {
            total += h.await.unwrap();
        }
        assert_eq!(total, 25);
    }
}
