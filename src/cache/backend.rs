//! Cache backend implementations.

use super::key::CacheKey;
use crate::clock::{deadline_ms, system_clock, Clock};
use crate::scheduler::{NoopScheduler, Scheduler, TimerId};
use crate::{Error, ErrorContext, Result};
use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock, RwLockWriteGuard, Weak};
use std::time::Duration;
use tracing::debug;

/// Point-in-time view of a cache's live contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheSnapshot {
    pub size: usize,
    pub keys: Vec<String>,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;
    /// Store `value`, fully replacing any previous entry under `key`.
    async fn set(&self, key: &CacheKey, value: Bytes, ttl: Duration, tags: &[String])
        -> Result<()>;
    async fn delete(&self, key: &CacheKey) -> Result<bool>;
    /// Remove every entry tagged with `tag`, returning how many were removed.
    async fn invalidate_by_tag(&self, tag: &str) -> Result<usize>;
    async fn clear(&self) -> Result<()>;
    async fn snapshot(&self) -> Result<CacheSnapshot>;
    fn name(&self) -> &'static str;
}

struct CacheEntry {
    data: Bytes,
    expires_at: u64,
    tags: HashSet<String>,
    generation: u64,
    timer: Option<TimerId>,
}

impl CacheEntry {
    fn is_expired(&self, now: u64) -> bool {
        now > self.expires_at
    }
}

#[derive(Default)]
struct Store {
    entries: HashMap<String, CacheEntry>,
    tags: HashMap<String, HashSet<String>>,
    generation: u64,
}

impl Store {
    /// Remove an entry and unlink it from every tag it belongs to.
    fn unlink(&mut self, key: &str) -> Option<CacheEntry> {
        let entry = self.entries.remove(key)?;
        for tag in &entry.tags {
            if let Some(keys) = self.tags.get_mut(tag) {
                keys.remove(key);
                if keys.is_empty() {
                    self.tags.remove(tag);
                }
            }
        }
        Some(entry)
    }
}

/// In-memory TTL cache with a tag index and optional eager eviction timers.
///
/// Expired entries are dropped lazily on access; when a [`Scheduler`] is
/// configured each entry also arms a timer that removes it at expiry. Timers
/// are cancelled whenever their entry is overwritten or removed, and each timer
/// only removes the generation of the entry it was armed for.
pub struct MemoryCache {
    store: Arc<RwLock<Store>>,
    max_entries: usize,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
}

impl MemoryCache {
    pub const DEFAULT_MAX_ENTRIES: usize = 10_000;

    pub fn new(max_entries: usize) -> Self {
        Self {
            store: Arc::new(RwLock::new(Store::default())),
            max_entries: max_entries.max(1),
            clock: system_clock(),
            scheduler: Arc::new(NoopScheduler),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn max_entries(&self) -> usize {
        self.max_entries
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Store>> {
        self.store.write().map_err(|_| {
            Error::runtime_with_context(
                "cache store lock poisoned",
                ErrorContext::new().with_source("memory_cache"),
            )
        })
    }

    fn discard(&self, store: &mut Store, key: &str) -> bool {
        match store.unlink(key) {
            Some(entry) => {
                if let Some(timer) = entry.timer {
                    self.scheduler.cancel(timer);
                }
                true
            }
            None => false,
        }
    }

    fn purge_locked(&self, store: &mut Store, now: u64) -> usize {
        let expired: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, e)| e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        for key in &expired {
            self.discard(store, key);
        }
        expired.len()
    }

    fn make_room(&self, store: &mut Store, now: u64) {
        if store.entries.len() < self.max_entries {
            return;
        }
        self.purge_locked(store, now);
        while store.entries.len() >= self.max_entries {
            let soonest = store
                .entries
                .iter()
                .min_by_key(|(_, e)| e.expires_at)
                .map(|(k, _)| k.clone());
            match soonest {
                Some(key) => {
                    debug!(key = %key, "evicting cache entry at capacity");
                    self.discard(store, &key);
                }
                None => break,
            }
        }
    }

    fn arm_timer(&self, key: &str, generation: u64, ttl: Duration) -> Option<TimerId> {
        let store: Weak<RwLock<Store>> = Arc::downgrade(&self.store);
        let key = key.to_string();
        self.scheduler.schedule(
            ttl,
            Box::new(move || {
                let Some(store) = store.upgrade() else {
                    return;
                };
                let Ok(mut store) = store.write() else {
                    return;
                };
                let current = store.entries.get(&key).map(|e| e.generation);
                if current == Some(generation) {
                    store.unlink(&key);
                    debug!(key = %key, "cache entry evicted by timer");
                }
            }),
        )
    }

    /// Eagerly remove every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = self.clock.now_ms();
        let mut store = self.write()?;
        Ok(self.purge_locked(&mut store, now))
    }

    /// Time left before `key` expires, if it is live.
    pub fn ttl_remaining(&self, key: &CacheKey) -> Option<Duration> {
        let now = self.clock.now_ms();
        let store = self.store.read().ok()?;
        let entry = store.entries.get(key.as_str())?;
        if entry.is_expired(now) {
            return None;
        }
        Some(Duration::from_millis(entry.expires_at - now))
    }

    /// Tags currently indexed, sorted.
    pub fn tags(&self) -> Vec<String> {
        let Ok(store) = self.store.read() else {
            return Vec::new();
        };
        let mut tags: Vec<String> = store.tags.keys().cloned().collect();
        tags.sort();
        tags
    }

    /// Entries held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Eviction timers still armed by this cache's scheduler.
    pub fn pending_timers(&self) -> usize {
        self.scheduler.pending()
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ENTRIES)
    }
}

#[async_trait]
impl CacheBackend for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let now = self.clock.now_ms();
        let mut store = self.write()?;
        let lookup = store
            .entries
            .get(key.as_str())
            .map(|e| (e.is_expired(now), e.data.clone()));
        match lookup {
            None => Ok(None),
            Some((false, data)) => Ok(Some(data)),
            Some((true, _)) => {
                debug!(key = %key, "cache entry expired on access");
                self.discard(&mut store, key.as_str());
                Ok(None)
            }
        }
    }

    async fn set(
        &self,
        key: &CacheKey,
        value: Bytes,
        ttl: Duration,
        tags: &[String],
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let mut store = self.write()?;
        if !self.discard(&mut store, key.as_str()) {
            self.make_room(&mut store, now);
        }

        store.generation += 1;
        let generation = store.generation;
        let tag_set: HashSet<String> = tags.iter().cloned().collect();
        for tag in &tag_set {
            store
                .tags
                .entry(tag.clone())
                .or_default()
                .insert(key.as_str().to_string());
        }
        let timer = self.arm_timer(key.as_str(), generation, ttl);
        store.entries.insert(
            key.as_str().to_string(),
            CacheEntry {
                data: value,
                expires_at: deadline_ms(now, ttl),
                tags: tag_set,
                generation,
                timer,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &CacheKey) -> Result<bool> {
        let mut store = self.write()?;
        Ok(self.discard(&mut store, key.as_str()))
    }

    async fn invalidate_by_tag(&self, tag: &str) -> Result<usize> {
        let mut store = self.write()?;
        let keys: Vec<String> = store
            .tags
            .get(tag)
            .map(|k| k.iter().cloned().collect())
            .unwrap_or_default();
        let mut removed = 0;
        for key in &keys {
            if self.discard(&mut store, key) {
                removed += 1;
            }
        }
        store.tags.remove(tag);
        debug!(tag, removed, "cache tag invalidated");
        Ok(removed)
    }

    async fn clear(&self) -> Result<()> {
        let mut store = self.write()?;
        for entry in store.entries.values() {
            if let Some(timer) = entry.timer {
                self.scheduler.cancel(timer);
            }
        }
        store.entries.clear();
        store.tags.clear();
        Ok(())
    }

    async fn snapshot(&self) -> Result<CacheSnapshot> {
        let now = self.clock.now_ms();
        let store = self.store.read().map_err(|_| {
            Error::runtime_with_context(
                "cache store lock poisoned",
                ErrorContext::new().with_source("memory_cache"),
            )
        })?;
        let mut keys: Vec<String> = store
            .entries
            .iter()
            .filter(|(_, e)| !e.is_expired(now))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        Ok(CacheSnapshot {
            size: keys.len(),
            keys,
        })
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

/// Backend for `strategy: none`; stores nothing.
pub struct NullCache;
impl NullCache {
    pub fn new() -> Self {
        Self
    }
}
impl Default for NullCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheBackend for NullCache {
    async fn get(&self, _: &CacheKey) -> Result<Option<Bytes>> {
        Ok(None)
    }
    async fn set(&self, _: &CacheKey, _: Bytes, _: Duration, _: &[String]) -> Result<()> {
        Ok(())
    }
    async fn delete(&self, _: &CacheKey) -> Result<bool> {
        Ok(false)
    }
    async fn invalidate_by_tag(&self, _: &str) -> Result<usize> {
        Ok(0)
    }
    async fn clear(&self) -> Result<()> {
        Ok(())
    }
    async fn snapshot(&self) -> Result<CacheSnapshot> {
        Ok(CacheSnapshot::default())
    }
    fn name(&self) -> &'static str {
        "null"
    }
}
