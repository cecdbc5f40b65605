//! Optimizer-wide configuration and named pipelines.

use crate::cache::{CacheConfig, MemoryCache};
use crate::middleware::PipelineConfig;
use crate::telemetry::MetricsCollector;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Limits for the shared stores plus any number of named pipeline configs.
///
/// ```yaml
/// max_metrics: 1000
/// max_cache_entries: 10000
/// eager_expiry: true
/// cache:
///   default_ttl: 300
///   key_prefix: api
/// pipelines:
///   portfolios:
///     cache: { strategy: memory, ttl_seconds: 60, tags: [portfolios] }
///     rate_limit: { requests: 100, window_seconds: 60 }
///     metrics: true
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizerConfig {
    /// Metric records retained by the collector.
    pub max_metrics: usize,
    pub max_cache_entries: usize,
    /// Arm a timer per cache entry instead of relying on lazy expiry alone.
    pub eager_expiry: bool,
    /// Also emit every metric record as a tracing event.
    pub log_requests: bool,
    pub cache: CacheConfig,
    pub pipelines: BTreeMap<String, PipelineConfig>,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            max_metrics: MetricsCollector::DEFAULT_MAX_METRICS,
            max_cache_entries: MemoryCache::DEFAULT_MAX_ENTRIES,
            eager_expiry: true,
            log_requests: false,
            cache: CacheConfig::default(),
            pipelines: BTreeMap::new(),
        }
    }
}

impl OptimizerConfig {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_max_metrics(mut self, n: usize) -> Self {
        self.max_metrics = n;
        self
    }
    pub fn with_max_cache_entries(mut self, n: usize) -> Self {
        self.max_cache_entries = n;
        self
    }
    pub fn with_eager_expiry(mut self, enabled: bool) -> Self {
        self.eager_expiry = enabled;
        self
    }
    pub fn with_log_requests(mut self, enabled: bool) -> Self {
        self.log_requests = enabled;
        self
    }
    pub fn with_cache(mut self, cache: CacheConfig) -> Self {
        self.cache = cache;
        self
    }
    pub fn with_pipeline(mut self, name: impl Into<String>, pipeline: PipelineConfig) -> Self {
        self.pipelines.insert(name.into(), pipeline);
        self
    }

    pub fn pipeline(&self, name: &str) -> Option<&PipelineConfig> {
        self.pipelines.get(name)
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a `.json` file, or YAML for any other extension.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let is_json = path
            .extension()
            .and_then(|s| s.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
        if is_json {
            Self::from_json_str(&content)
        } else {
            Self::from_yaml_str(&content)
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_metrics == 0 {
            return Err(invalid("must retain at least one metric", "max_metrics"));
        }
        if self.max_cache_entries == 0 {
            return Err(invalid("cache must hold at least one entry", "max_cache_entries"));
        }
        if self.cache.default_ttl.is_zero() {
            return Err(invalid("default ttl must be positive", "cache.default_ttl"));
        }
        for (name, pipeline) in &self.pipelines {
            pipeline.validate().map_err(|e| nest(e, name))?;
        }
        Ok(())
    }
}

fn invalid(msg: &str, field: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("optimizer_config"),
    )
}

/// Prefix a pipeline error's field path with the pipeline's location.
fn nest(err: Error, name: &str) -> Error {
    match err {
        Error::Configuration { message, context } => Error::Configuration {
            message,
            context: ErrorContext {
                field_path: context
                    .field_path
                    .map(|f| format!("pipelines.{}.{}", name, f)),
                ..context
            },
        },
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{CacheStage, RateLimitStage};
    use std::time::Duration;

    const YAML: &str = r#"
max_metrics: 50
eager_expiry: false
cache:
  default_ttl: 120
  key_prefix: api
pipelines:
  portfolios:
    cache:
      strategy: memory
      ttl_seconds: 60
      tags: [portfolios]
    rate_limit:
      requests: 100
      window_seconds: 60
    metrics: true
  health:
    metrics: false
"#;

    #[test]
    fn test_yaml_loading() {
        let cfg = OptimizerConfig::from_yaml_str(YAML).unwrap();
        assert_eq!(cfg.max_metrics, 50);
        assert_eq!(cfg.max_cache_entries, MemoryCache::DEFAULT_MAX_ENTRIES);
        assert!(!cfg.eager_expiry);
        assert_eq!(cfg.cache.default_ttl, Duration::from_secs(120));
        assert_eq!(cfg.cache.key_prefix.as_deref(), Some("api"));

        let p = cfg.pipeline("portfolios").unwrap();
        assert!(p.cache.is_enabled());
        assert!(matches!(p.rate_limit, RateLimitStage::Enabled(l) if l.requests == 100));
        assert_eq!(cfg.pipeline("health").unwrap().cache, CacheStage::None);
        assert!(cfg.pipeline("missing").is_none());
    }

    #[test]
    fn test_json_loading() {
        let cfg = OptimizerConfig::from_json_str(
            r#"{"pipelines": {"list": {"cache": {"strategy": "memory", "ttl_seconds": 5}}}}"#,
        )
        .unwrap();
        assert_eq!(cfg.max_metrics, 1000);
        assert!(cfg.pipeline("list").unwrap().cache.is_enabled());
    }

    #[test]
    fn test_nested_validation_error_path() {
        let err = OptimizerConfig::from_yaml_str(
            "pipelines:\n  bad:\n    rate_limit: { requests: 0, window_seconds: 60 }\n",
        )
        .unwrap_err();
        assert_eq!(
            err.context().and_then(|c| c.field_path.as_deref()),
            Some("pipelines.bad.rate_limit.requests")
        );

        let err = OptimizerConfig::new().with_max_metrics(0).validate().unwrap_err();
        assert!(err.to_string().contains("max_metrics"));
    }

    #[test]
    fn test_malformed_input() {
        assert!(matches!(
            OptimizerConfig::from_yaml_str("pipelines: [1, 2]"),
            Err(Error::Yaml(_))
        ));
        assert!(matches!(
            OptimizerConfig::from_json_str("{"),
            Err(Error::Serialization(_))
        ));
        assert!(matches!(
            OptimizerConfig::from_file("/definitely/not/here.yaml"),
            Err(Error::Io(_))
        ));
    }

    #[test]
    fn test_from_file_picks_format_by_extension() {
        let dir = std::env::temp_dir();
        let json = dir.join(format!("api-optimizer-{}.json", std::process::id()));
        std::fs::write(&json, r#"{"max_metrics": 7}"#).unwrap();
        assert_eq!(OptimizerConfig::from_file(&json).unwrap().max_metrics, 7);
        std::fs::remove_file(&json).unwrap();

        let yaml = dir.join(format!("api-optimizer-{}.yml", std::process::id()));
        std::fs::write(&yaml, "max_metrics: 9\n").unwrap();
        assert_eq!(OptimizerConfig::from_file(&yaml).unwrap().max_metrics, 9);
        std::fs::remove_file(&yaml).unwrap();
    }
}
