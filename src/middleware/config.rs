//! Per-pipeline stage configuration.

use crate::resilience::RateLimitConfig;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Response caching for a pipeline.
///
/// ```yaml
/// cache:
///   strategy: memory
///   ttl_seconds: 60
///   tags: [portfolios]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum CacheStage {
    None,
    Memory {
        ttl_seconds: u64,
        /// Fixed key shared by every request; derived from method and URL when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        key: Option<String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        tags: Vec<String>,
    },
}

impl Default for CacheStage {
    fn default() -> Self {
        CacheStage::None
    }
}

/// Seconds in `ttl`, rounded up so sub-second TTLs stay non-zero.
fn whole_seconds(ttl: Duration) -> u64 {
    ttl.as_secs().saturating_add(u64::from(ttl.subsec_nanos() > 0))
}

impl CacheStage {
    pub fn memory(ttl: Duration) -> Self {
        CacheStage::Memory {
            ttl_seconds: whole_seconds(ttl),
            key: None,
            tags: Vec::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self, CacheStage::Memory { .. })
    }
}

/// Per-caller throttling; present in config means enabled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Option<RateLimitConfig>", into = "Option<RateLimitConfig>")]
pub enum RateLimitStage {
    #[default]
    Disabled,
    Enabled(RateLimitConfig),
}

impl From<Option<RateLimitConfig>> for RateLimitStage {
    fn from(cfg: Option<RateLimitConfig>) -> Self {
        cfg.map_or(RateLimitStage::Disabled, RateLimitStage::Enabled)
    }
}

impl From<RateLimitStage> for Option<RateLimitConfig> {
    fn from(stage: RateLimitStage) -> Self {
        match stage {
            RateLimitStage::Disabled => None,
            RateLimitStage::Enabled(cfg) => Some(cfg),
        }
    }
}

/// Which stages wrap a handler, and how.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub cache: CacheStage,
    pub rate_limit: RateLimitStage,
    pub metrics: bool,
}

impl PipelineConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_cache(mut self, ttl: Duration, tags: &[&str]) -> Self {
        self.cache = CacheStage::Memory {
            ttl_seconds: whole_seconds(ttl),
            key: None,
            tags: tags.iter().map(|t| t.to_string()).collect(),
        };
        self
    }

    /// Pin the cache key. Has no effect unless caching is enabled.
    pub fn with_cache_key(mut self, fixed: impl Into<String>) -> Self {
        if let CacheStage::Memory { key, .. } = &mut self.cache {
            *key = Some(fixed.into());
        }
        self
    }

    pub fn with_rate_limit(mut self, requests: u32, window: Duration) -> Self {
        self.rate_limit = RateLimitStage::Enabled(RateLimitConfig::new(requests, window));
        self
    }

    pub fn with_metrics(mut self, enabled: bool) -> Self {
        self.metrics = enabled;
        self
    }

    /// Reject configurations that would build a useless or broken stage.
    pub fn validate(&self) -> Result<()> {
        if let CacheStage::Memory { ttl_seconds, key, .. } = &self.cache {
            if *ttl_seconds == 0 {
                return Err(invalid("cache ttl must be positive", "cache.ttl_seconds"));
            }
            if key.as_deref().is_some_and(|k| k.trim().is_empty()) {
                return Err(invalid("cache key must not be blank", "cache.key"));
            }
        }
        if let RateLimitStage::Enabled(cfg) = &self.rate_limit {
            if cfg.requests == 0 {
                return Err(invalid("rate limit must allow at least one request", "rate_limit.requests"));
            }
            if cfg.window.is_zero() {
                return Err(invalid("rate limit window must be positive", "rate_limit.window_seconds"));
            }
        }
        Ok(())
    }
}

fn invalid(msg: &str, field: &str) -> Error {
    Error::configuration_with_context(
        msg,
        ErrorContext::new()
            .with_field_path(field)
            .with_source("pipeline_config"),
    )
}
