//! Cache manager.

use super::backend::{CacheBackend, CacheSnapshot};
use super::key::CacheKey;
use crate::Result;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    #[serde(with = "duration_secs")]
    pub default_ttl: Duration,
    pub enabled: bool,
    pub max_entry_size: usize,
    pub key_prefix: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self { Self { default_ttl: Duration::from_secs(300), enabled: true, max_entry_size: 10 * 1024 * 1024, key_prefix: None } }
}

impl CacheConfig {
    pub fn new() -> Self { Self::default() }
    pub fn with_ttl(mut self, ttl: Duration) -> Self { self.default_ttl = ttl; self }
    pub fn with_enabled(mut self, enabled: bool) -> Self { self.enabled = enabled; self }
    pub fn with_max_entry_size(mut self, size: usize) -> Self { self.max_entry_size = size; self }
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self { self.key_prefix = Some(prefix.into()); self }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> { s.serialize_u64(d.as_secs()) }
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> { u64::deserialize(d).map(Duration::from_secs) }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats { pub hits: u64, pub misses: u64, pub sets: u64, pub deletes: u64, pub errors: u64 }

impl CacheStats {
    pub fn hit_ratio(&self) -> f64 { let total = self.hits + self.misses; if total == 0 { 0.0 } else { self.hits as f64 / total as f64 } }
}

struct AtomicStats { hits: AtomicU64, misses: AtomicU64, sets: AtomicU64, deletes: AtomicU64, errors: AtomicU64 }
impl AtomicStats {
    fn new() -> Self { Self { hits: AtomicU64::new(0), misses: AtomicU64::new(0), sets: AtomicU64::new(0), deletes: AtomicU64::new(0), errors: AtomicU64::new(0) } }
    fn to_stats(&self) -> CacheStats { CacheStats { hits: self.hits.load(Ordering::Relaxed), misses: self.misses.load(Ordering::Relaxed), sets: self.sets.load(Ordering::Relaxed), deletes: self.deletes.load(Ordering::Relaxed), errors: self.errors.load(Ordering::Relaxed) } }
    fn reset(&self) { for c in [&self.hits, &self.misses, &self.sets, &self.deletes, &self.errors] { c.store(0, Ordering::Relaxed); } }
}

/// Typed front for a [`CacheBackend`]: JSON-encodes values and keeps hit/miss counters.
pub struct CacheManager { config: CacheConfig, backend: Arc<dyn CacheBackend>, stats: Arc<AtomicStats> }

impl CacheManager {
    pub fn new(config: CacheConfig, backend: Arc<dyn CacheBackend>) -> Self { Self { config, backend, stats: Arc::new(AtomicStats::new()) } }

    pub fn config(&self) -> &CacheConfig { &self.config }

    pub async fn get<T: DeserializeOwned>(&self, key: &CacheKey) -> Result<Option<T>> {
        if !self.config.enabled { return Ok(None); }
        let prefixed = self.prefix_key(key);
        match self.backend.get(&prefixed).await {
            Ok(Some(data)) => {
                match serde_json::from_slice(&data) {
                    Ok(val) => { self.stats.hits.fetch_add(1, Ordering::Relaxed); Ok(Some(val)) }
                    Err(e) => {
                        // undecodable entries count as misses and are dropped
                        warn!(key = %prefixed, error = %e, "discarding undecodable cache entry");
                        self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        self.stats.misses.fetch_add(1, Ordering::Relaxed);
                        if let Err(e) = self.backend.delete(&prefixed).await {
                            debug!(key = %prefixed, error = %e, "failed to drop undecodable cache entry");
                            self.stats.errors.fetch_add(1, Ordering::Relaxed);
                        }
                        Ok(None)
                    }
                }
            }
            Ok(None) => { self.stats.misses.fetch_add(1, Ordering::Relaxed); Ok(None) }
            Err(e) => { self.stats.errors.fetch_add(1, Ordering::Relaxed); Err(e) }
        }
    }

    pub async fn set<T: Serialize>(&self, key: &CacheKey, value: &T, tags: &[String]) -> Result<()> { self.set_with_ttl(key, value, self.config.default_ttl, tags).await }

    pub async fn set_with_ttl<T: Serialize>(&self, key: &CacheKey, value: &T, ttl: Duration, tags: &[String]) -> Result<()> {
        if !self.config.enabled { return Ok(()); }
        let data = serde_json::to_vec(value)?;
        if data.len() > self.config.max_entry_size {
            warn!(key = %key, size = data.len(), limit = self.config.max_entry_size, "value too large to cache");
            return Ok(());
        }
        let prefixed = self.prefix_key(key);
        match self.backend.set(&prefixed, Bytes::from(data), ttl, tags).await { Ok(()) => { self.stats.sets.fetch_add(1, Ordering::Relaxed); Ok(()) } Err(e) => { self.stats.errors.fetch_add(1, Ordering::Relaxed); Err(e) } }
    }

    pub async fn delete(&self, key: &CacheKey) -> Result<bool> {
        if !self.config.enabled { return Ok(false); }
        let prefixed = self.prefix_key(key);
        match self.backend.delete(&prefixed).await { Ok(d) => { if d { self.stats.deletes.fetch_add(1, Ordering::Relaxed); } Ok(d) } Err(e) => { self.stats.errors.fetch_add(1, Ordering::Relaxed); Err(e) } }
    }

    pub async fn invalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let removed = self.backend.invalidate_by_tag(tag).await?;
        self.stats.deletes.fetch_add(removed as u64, Ordering::Relaxed);
        Ok(removed)
    }

    /// Drop every entry and zero the counters.
    pub async fn clear(&self) -> Result<()> {
        self.backend.clear().await?;
        self.stats.reset();
        Ok(())
    }

    pub async fn snapshot(&self) -> Result<CacheSnapshot> { self.backend.snapshot().await }

    pub fn stats(&self) -> CacheStats { self.stats.to_stats() }
    pub fn backend_name(&self) -> &'static str { self.backend.name() }

    fn prefix_key(&self, key: &CacheKey) -> CacheKey {
        if let Some(ref p) = self.config.key_prefix { CacheKey::new(format!("{}:{}", p, key.value)) } else { key.clone() }
    }
}
