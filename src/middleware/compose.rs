//! Assembling stages around a handler.

use super::config::{CacheStage, PipelineConfig, RateLimitStage};
use super::handler::{Handler, Middleware, Next};
use super::layers::{CacheLayer, MetricsLayer, RateLimitLayer};
use super::request::{Request, Response};
use super::IdentifierResolver;
use crate::cache::{CacheKeyGenerator, CacheManager};
use crate::clock::Clock;
use crate::resilience::FixedWindowLimiter;
use crate::telemetry::MetricsSink;
use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builds a [`ComposedHandler`] from a [`PipelineConfig`] and the shared stores.
///
/// Enabled stages are always applied outermost-first as cache, rate limit,
/// metrics, so cache hits bypass both throttling and accounting.
pub struct PipelineBuilder {
    config: PipelineConfig,
    cache: Arc<CacheManager>,
    limiter: Arc<FixedWindowLimiter>,
    sink: Arc<dyn MetricsSink>,
    clock: Arc<dyn Clock>,
    resolver: Option<IdentifierResolver>,
    key_generator: Option<CacheKeyGenerator>,
    extra: Vec<Arc<dyn Middleware>>,
}

impl PipelineBuilder {
    pub fn new(
        config: PipelineConfig,
        cache: Arc<CacheManager>,
        limiter: Arc<FixedWindowLimiter>,
        sink: Arc<dyn MetricsSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            cache,
            limiter,
            sink,
            clock,
            resolver: None,
            key_generator: None,
            extra: Vec::new(),
        }
    }

    /// Derive the rate-limit identity from the request, e.g. an API key header.
    /// Returning `None` falls back to the client address.
    pub fn with_identifier_resolver<F>(mut self, resolve: F) -> Self
    where
        F: Fn(&Request) -> Option<String> + Send + Sync + 'static,
    {
        self.resolver = Some(Arc::new(resolve));
        self
    }

    pub fn with_cache_key(mut self, key: impl Into<String>) -> Self {
        self.config = self.config.with_cache_key(key);
        self
    }

    pub fn with_key_generator(mut self, keys: CacheKeyGenerator) -> Self {
        self.key_generator = Some(keys);
        self
    }

    /// Run an additional stage innermost, between metrics and the handler.
    pub fn with_middleware(mut self, stage: Arc<dyn Middleware>) -> Self {
        self.extra.push(stage);
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn build<H: Handler + 'static>(self, handler: H) -> Result<ComposedHandler> {
        self.config.validate()?;

        let mut stages: Vec<Arc<dyn Middleware>> = Vec::new();
        if let CacheStage::Memory {
            ttl_seconds,
            key,
            tags,
        } = &self.config.cache
        {
            let mut layer = CacheLayer::new(self.cache.clone(), Duration::from_secs(*ttl_seconds))
                .with_fixed_key(key.clone())
                .with_tags(tags.clone());
            if let Some(keys) = self.key_generator {
                layer = layer.with_key_generator(keys);
            }
            stages.push(Arc::new(layer));
        }
        if let RateLimitStage::Enabled(limit) = self.config.rate_limit {
            stages.push(Arc::new(
                RateLimitLayer::new(self.limiter.clone(), limit, self.clock.clone())
                    .with_resolver(self.resolver),
            ));
        }
        if self.config.metrics {
            stages.push(Arc::new(MetricsLayer::new(self.sink.clone(), self.clock.clone())));
        }
        stages.extend(self.extra);

        let composed = ComposedHandler {
            stages,
            handler: Arc::new(handler),
            config: self.config,
        };
        debug!(stages = ?composed.stage_names(), "pipeline built");
        Ok(composed)
    }
}

/// A handler wrapped in its configured stages. Cheap to share behind an `Arc`.
pub struct ComposedHandler {
    stages: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn Handler>,
    config: PipelineConfig,
}

impl ComposedHandler {
    pub async fn handle(&self, req: Request) -> Result<Response> {
        Next::new(&self.stages, self.handler.as_ref()).run(req).await
    }

    /// Stage names, outermost first.
    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }
}

#[async_trait]
impl Handler for ComposedHandler {
    async fn call(&self, req: Request) -> Result<Response> {
        self.handle(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, MemoryCache};
    use crate::clock::ManualClock;
    use crate::middleware::{handler_fn, X_CACHE};
    use crate::telemetry::MetricsCollector;

    fn builder(config: PipelineConfig) -> (PipelineBuilder, Arc<MetricsCollector>) {
        let clock = Arc::new(ManualClock::new());
        let collector = Arc::new(MetricsCollector::new(100));
        let cache = Arc::new(CacheManager::new(
            CacheConfig::new(),
            Arc::new(MemoryCache::new(16).with_clock(clock.clone())),
        ));
        let b = PipelineBuilder::new(
            config,
            cache,
            Arc::new(FixedWindowLimiter::with_clock(clock.clone())),
            collector.clone(),
            clock,
        );
        (b, collector)
    }

    fn echo() -> impl Handler {
        handler_fn(|req: Request| async move { Ok(Response::ok(req.url)) })
    }

    #[test]
    fn test_stage_order_is_fixed() {
        let config = PipelineConfig::new()
            .with_metrics(true)
            .with_rate_limit(10, Duration::from_secs(60))
            .with_cache(Duration::from_secs(30), &[]);
        let (b, _) = builder(config);
        let composed = b.build(echo()).unwrap();
        assert_eq!(composed.stage_names(), vec!["cache", "rate_limit", "metrics"]);

        let (b, _) = builder(PipelineConfig::new().with_metrics(true));
        assert_eq!(b.build(echo()).unwrap().stage_names(), vec!["metrics"]);
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let (b, _) = builder(PipelineConfig::new().with_rate_limit(0, Duration::from_secs(1)));
        assert!(b.build(echo()).is_err());
    }

    #[tokio::test]
    async fn test_cache_hit_skips_metrics() {
        let config = PipelineConfig::new()
            .with_cache(Duration::from_secs(30), &[])
            .with_metrics(true);
        let (b, collector) = builder(config);
        let composed = b.build(echo()).unwrap();

        let miss = composed.handle(Request::get("/items")).await.unwrap();
        assert_eq!(miss.header(X_CACHE), Some("MISS"));
        let hit = composed.handle(Request::get("/items")).await.unwrap();
        assert_eq!(hit.header(X_CACHE), Some("HIT"));
        assert_eq!(collector.len().await, 1);
    }

    #[tokio::test]
    async fn test_builder_key_overrides_config() {
        let (b, _) = builder(PipelineConfig::new().with_cache(Duration::from_secs(30), &[]));
        let composed = b.with_cache_key("all-items").build(echo()).unwrap();
        composed.handle(Request::get("/a")).await.unwrap();
        let hit = composed.call(Request::get("/b")).await.unwrap();
        assert_eq!(hit.header(X_CACHE), Some("HIT"));
        assert_eq!(hit.body, "/a");
    }
}
