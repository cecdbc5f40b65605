//! The three stages a pipeline can wrap around a handler.

use super::handler::{Middleware, Next};
use super::request::{Request, Response};
use super::{
    IdentifierResolver, ANONYMOUS, RETRY_AFTER, VARY, X_CACHE, X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING, X_RATELIMIT_RESET, X_RESPONSE_TIME,
};
use crate::cache::{CacheKey, CacheKeyGenerator, CacheManager};
use crate::clock::Clock;
use crate::resilience::{FixedWindowLimiter, RateLimitConfig, RateLimitDecision};
use crate::telemetry::{MetricRecord, MetricsSink};
use crate::Result;
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Headers that describe one particular exchange and must not be replayed from cache.
const PER_REQUEST_HEADERS: [&str; 6] = [
    X_CACHE,
    X_RATELIMIT_LIMIT,
    X_RATELIMIT_REMAINING,
    X_RATELIMIT_RESET,
    RETRY_AFTER,
    X_RESPONSE_TIME,
];

const RATE_LIMITED_BODY: &str = r#"{"error":"Rate limit exceeded"}"#;

/// Serves repeated safe requests from the shared cache.
///
/// Only GET is looked up; only 2xx responses are stored. Cache
/// failures are logged and treated as misses.
pub struct CacheLayer {
    cache: Arc<CacheManager>,
    ttl: Duration,
    fixed_key: Option<String>,
    tags: Vec<String>,
    keys: CacheKeyGenerator,
}

impl CacheLayer {
    pub fn new(cache: Arc<CacheManager>, ttl: Duration) -> Self {
        Self {
            cache,
            ttl,
            fixed_key: None,
            tags: Vec::new(),
            keys: CacheKeyGenerator::new(),
        }
    }
    pub fn with_fixed_key(mut self, key: Option<String>) -> Self {
        self.fixed_key = key;
        self
    }
    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }
    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.keys = keys;
        self
    }

    fn key_for(&self, req: &Request) -> CacheKey {
        match &self.fixed_key {
            Some(k) => CacheKey::new(format!("{}:{}", req.method, k))
                .with_method(req.method.as_str())
                .with_path(req.path()),
            None => self.keys.generate(req.method.as_str(), &req.url),
        }
    }
}

#[async_trait]
impl Middleware for CacheLayer {
    async fn process(&self, req: Request, next: Next<'_>) -> Result<Response> {
        if !req.method.is_cacheable() {
            return next.run(req).await;
        }

        let key = self.key_for(&req);
        let vary = req.accepts_compression();

        match self.cache.get::<Response>(&key).await {
            Ok(Some(mut cached)) => {
                debug!(key = %key, "cache hit");
                cached.headers.insert(X_CACHE, "HIT");
                if vary {
                    cached.headers.insert(VARY, "Accept-Encoding");
                }
                return Ok(cached);
            }
            Ok(None) => {}
            Err(e) => warn!(key = %key, error = %e, "cache lookup failed, continuing uncached"),
        }

        let mut response = next.run(req).await?;
        if vary {
            response.headers.insert(VARY, "Accept-Encoding");
        }
        if response.is_success() {
            let mut stored = response.clone();
            for name in PER_REQUEST_HEADERS {
                stored.headers.remove(name);
            }
            if let Err(e) = self
                .cache
                .set_with_ttl(&key, &stored, self.ttl, &self.tags)
                .await
            {
                warn!(key = %key, error = %e, "failed to store response in cache");
            }
        }
        response.headers.insert(X_CACHE, "MISS");
        Ok(response)
    }

    fn name(&self) -> &str {
        "cache"
    }
}

/// Rejects callers that exhausted their window with a 429.
pub struct RateLimitLayer {
    limiter: Arc<FixedWindowLimiter>,
    config: RateLimitConfig,
    clock: Arc<dyn Clock>,
    resolver: Option<IdentifierResolver>,
}

impl RateLimitLayer {
    pub fn new(limiter: Arc<FixedWindowLimiter>, config: RateLimitConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            limiter,
            config,
            clock,
            resolver: None,
        }
    }
    pub fn with_resolver(mut self, resolver: Option<IdentifierResolver>) -> Self {
        self.resolver = resolver;
        self
    }

    /// Resolver first, then the client address chain, then a shared bucket.
    fn identify(&self, req: &Request) -> String {
        self.resolver
            .as_ref()
            .and_then(|resolve| resolve(req))
            .or_else(|| req.client_address())
            .unwrap_or_else(|| ANONYMOUS.to_string())
    }
}

fn quota_headers(resp: &mut Response, d: &RateLimitDecision) {
    resp.headers.insert(X_RATELIMIT_LIMIT, d.limit.to_string());
    resp.headers.insert(X_RATELIMIT_REMAINING, d.remaining.to_string());
    resp.headers
        .insert(X_RATELIMIT_RESET, d.reset_at_ms.div_ceil(1000).to_string());
}

#[async_trait]
impl Middleware for RateLimitLayer {
    async fn process(&self, req: Request, next: Next<'_>) -> Result<Response> {
        let identifier = self.identify(&req);
        let decision = self.limiter.check(&identifier, &self.config).await;

        if !decision.allowed {
            let retry_after = decision.retry_after_secs(self.clock.now_ms());
            debug!(identifier = %identifier, retry_after, "rate limit exceeded");
            let mut resp = Response::new(429)
                .with_header("content-type", "application/json")
                .with_header(RETRY_AFTER, retry_after.to_string())
                .with_body(Bytes::from_static(RATE_LIMITED_BODY.as_bytes()));
            quota_headers(&mut resp, &decision);
            return Ok(resp);
        }

        let mut resp = next.run(req).await?;
        quota_headers(&mut resp, &decision);
        Ok(resp)
    }

    fn name(&self) -> &str {
        "rate_limit"
    }
}

/// Times the rest of the chain and records one [`MetricRecord`] per request.
///
/// Handler errors are recorded with their status (500 when they carry none)
/// and then propagated unchanged. Sink failures are logged and swallowed.
pub struct MetricsLayer {
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
}

impl MetricsLayer {
    pub fn new(sink: Arc<dyn MetricsSink>, clock: Arc<dyn Clock>) -> Self {
        Self { sink, clock }
    }
}

#[async_trait]
impl Middleware for MetricsLayer {
    async fn process(&self, req: Request, next: Next<'_>) -> Result<Response> {
        let started = self.clock.now_ms();
        let endpoint = req.path();
        let method = req.method.to_string();
        let ip = req.client_address();
        let user_agent = req.header("user-agent").map(str::to_string);

        let result = next.run(req).await;
        let finished = self.clock.now_ms();
        let elapsed = finished.saturating_sub(started);

        let status = match &result {
            Ok(resp) => resp.status,
            Err(e) => e.status_code(),
        };
        let mut record = MetricRecord::new(endpoint, method, status, elapsed, finished);
        if let Some(ip) = ip {
            record = record.with_ip(ip);
        }
        if let Some(ua) = user_agent {
            record = record.with_user_agent(ua);
        }
        if let Err(e) = self.sink.record(record).await {
            warn!(error = %e, "failed to record request metric");
        }

        let mut resp = result?;
        resp.headers.insert(X_RESPONSE_TIME, format!("{}ms", elapsed));
        Ok(resp)
    }

    fn name(&self) -> &str {
        "metrics"
    }
}
