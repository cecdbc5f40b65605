//! Shared optimizer state and its lifecycle.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`ApiOptimizer`] | Owns the cache, rate limiter and metrics collector shared by all pipelines |
//! | [`OptimizerConfig`] | Store limits and named pipeline configs, loadable from YAML/JSON |
//! | [`OptimizerStats`] | Introspection snapshot: cache contents plus request statistics |
//! | [`StatsHandler`] | Admin [`Handler`](crate::middleware::Handler) over the same state |
//!
//! Each `ApiOptimizer` is an isolated instance: two optimizers never share
//! entries, windows or metrics.

mod admin;
mod config;

pub use admin::StatsHandler;
pub use config::OptimizerConfig;

use crate::cache::{CacheBackend, CacheManager, CacheSnapshot, MemoryCache, NullCache};
use crate::clock::{system_clock, Clock};
use crate::middleware::PipelineBuilder;
use crate::middleware::PipelineConfig;
use crate::resilience::FixedWindowLimiter;
use crate::scheduler::{NoopScheduler, Scheduler, TokioScheduler};
use crate::telemetry::{
    CompositeMetricsSink, MetricsCollector, MetricsSink, MetricsStats, TracingMetricsSink,
};
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

/// What the admin endpoint and dashboards see.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimizerStats {
    pub cache: CacheSnapshot,
    pub metrics: MetricsStats,
}

/// Counts from one [`ApiOptimizer::purge_expired`] sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PurgeSummary {
    pub cache_entries: usize,
    pub rate_limit_windows: usize,
}

pub(crate) async fn collect_stats(
    cache: &CacheManager,
    metrics: &MetricsCollector,
) -> Result<OptimizerStats> {
    Ok(OptimizerStats {
        cache: cache.snapshot().await?,
        metrics: metrics.stats().await,
    })
}

struct Components {
    memory: Option<Arc<MemoryCache>>,
    cache: Arc<CacheManager>,
    limiter: Arc<FixedWindowLimiter>,
    metrics: Arc<MetricsCollector>,
    sink: Arc<dyn MetricsSink>,
}

impl Components {
    fn build(config: &OptimizerConfig, clock: &Arc<dyn Clock>, scheduler: &Arc<dyn Scheduler>) -> Self {
        let scheduler: Arc<dyn Scheduler> = if config.eager_expiry {
            scheduler.clone()
        } else {
            Arc::new(NoopScheduler)
        };
        let memory = config.cache.enabled.then(|| {
            Arc::new(
                MemoryCache::new(config.max_cache_entries)
                    .with_clock(clock.clone())
                    .with_scheduler(scheduler),
            )
        });
        let backend: Arc<dyn CacheBackend> = match &memory {
            Some(m) => m.clone(),
            None => Arc::new(NullCache::new()),
        };
        let metrics = Arc::new(MetricsCollector::new(config.max_metrics));
        let sink: Arc<dyn MetricsSink> = if config.log_requests {
            Arc::new(
                CompositeMetricsSink::new()
                    .add_sink(metrics.clone())
                    .add_sink(Arc::new(TracingMetricsSink)),
            )
        } else {
            metrics.clone()
        };
        Self {
            memory,
            cache: Arc::new(CacheManager::new(config.cache.clone(), backend)),
            limiter: Arc::new(FixedWindowLimiter::with_clock(clock.clone())),
            metrics,
            sink,
        }
    }
}

/// Dependency-injected home of the shared stores.
///
/// Construct one per application (or per test), hand out pipelines with
/// [`pipeline`](Self::pipeline), and use [`stats`](Self::stats),
/// [`clear_caches`](Self::clear_caches) and
/// [`invalidate_cache`](Self::invalidate_cache) for operations.
pub struct ApiOptimizer {
    config: OptimizerConfig,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    parts: Components,
}

impl ApiOptimizer {
    /// Wall clock, with tokio timers when `eager_expiry` is set.
    pub fn new(config: OptimizerConfig) -> Result<Self> {
        let scheduler: Arc<dyn Scheduler> = if config.eager_expiry {
            Arc::new(TokioScheduler::new())
        } else {
            Arc::new(NoopScheduler)
        };
        Self::with_runtime(config, system_clock(), scheduler)
    }

    /// Explicit time source and timer driver, e.g. `ManualClock` + `ManualScheduler`.
    ///
    /// The scheduler only arms expiry timers while `eager_expiry` is set; otherwise
    /// entries expire lazily on access or through [`purge_expired`](Self::purge_expired).
    pub fn with_runtime(
        config: OptimizerConfig,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
    ) -> Result<Self> {
        config.validate()?;
        let parts = Components::build(&config, &clock, &scheduler);
        info!(
            max_metrics = config.max_metrics,
            max_cache_entries = config.max_cache_entries,
            scheduler = scheduler.name(),
            pipelines = config.pipelines.len(),
            "optimizer initialized"
        );
        Ok(Self {
            config,
            clock,
            scheduler,
            parts,
        })
    }

    /// Replace every store with a fresh one built from `config`.
    ///
    /// Pipelines built earlier keep the stores they were built with.
    pub fn init(&mut self, config: OptimizerConfig) -> Result<()> {
        config.validate()?;
        self.parts = Components::build(&config, &self.clock, &self.scheduler);
        self.config = config;
        info!("optimizer re-initialized");
        Ok(())
    }

    /// Empty the cache, rate-limit windows and metrics in place.
    pub async fn reset(&self) -> Result<()> {
        self.parts.cache.clear().await?;
        self.parts.limiter.clear().await;
        self.parts.metrics.clear().await;
        info!("optimizer state reset");
        Ok(())
    }

    pub fn pipeline(&self, config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder::new(
            config,
            self.parts.cache.clone(),
            self.parts.limiter.clone(),
            self.parts.sink.clone(),
            self.clock.clone(),
        )
    }

    /// Builder for a pipeline declared under `pipelines` in the config.
    pub fn named_pipeline(&self, name: &str) -> Result<PipelineBuilder> {
        let config = self.config.pipeline(name).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown pipeline '{}'", name),
                ErrorContext::new()
                    .with_field_path(format!("pipelines.{}", name))
                    .with_source("optimizer_config"),
            )
        })?;
        Ok(self.pipeline(config))
    }

    pub async fn stats(&self) -> Result<OptimizerStats> {
        collect_stats(&self.parts.cache, &self.parts.metrics).await
    }

    pub async fn clear_caches(&self) -> Result<()> {
        self.parts.cache.clear().await?;
        info!("caches cleared");
        Ok(())
    }

    /// Drop every cache entry tagged `tag`. Returns how many were removed.
    pub async fn invalidate_cache(&self, tag: &str) -> Result<usize> {
        let removed = self.parts.cache.invalidate_by_tag(tag).await?;
        info!(tag = %tag, removed, "cache tag invalidated");
        Ok(removed)
    }

    /// Sweep expired cache entries and closed rate-limit windows.
    pub async fn purge_expired(&self) -> Result<PurgeSummary> {
        let cache_entries = match &self.parts.memory {
            Some(m) => m.purge_expired()?,
            None => 0,
        };
        let rate_limit_windows = self.parts.limiter.cleanup_expired().await;
        Ok(PurgeSummary {
            cache_entries,
            rate_limit_windows,
        })
    }

    pub fn stats_handler(&self) -> StatsHandler {
        StatsHandler::new(self.parts.cache.clone(), self.parts.metrics.clone())
    }

    pub fn config(&self) -> &OptimizerConfig {
        &self.config
    }
    pub fn cache(&self) -> &Arc<CacheManager> {
        &self.parts.cache
    }
    pub fn limiter(&self) -> &Arc<FixedWindowLimiter> {
        &self.parts.limiter
    }
    pub fn metrics(&self) -> &Arc<MetricsCollector> {
        &self.parts.metrics
    }
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }
    /// Eviction timers currently armed.
    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }
}
