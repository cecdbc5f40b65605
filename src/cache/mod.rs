//! In-process response caching with TTL expiry and tag-based invalidation.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`CacheBackend`] | Async trait for cache storage |
//! | [`MemoryCache`] | Bounded in-memory store with a tag index and eviction timers |
//! | [`NullCache`] | Always-miss backend used when caching is disabled |
//! | [`CacheManager`] | Typed wrapper with JSON encoding and hit/miss statistics |
//! | [`CacheKeyGenerator`] | Derives normalized keys from method and URL |
//!
//! ## Expiry
//!
//! An entry is visible until the clock passes `set time + ttl`. Expired entries are
//! removed when next touched, and eagerly when the cache has a
//! [`Scheduler`](crate::scheduler::Scheduler) that can arm timers.
//!
//! ```rust
//! use api_optimizer::cache::{CacheBackend, CacheKey, MemoryCache};
//! use bytes::Bytes;
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let cache = MemoryCache::new(1000);
//! let key = CacheKey::from("GET:/api/portfolios");
//! cache
//!     .set(&key, Bytes::from_static(b"[]"), Duration::from_secs(60), &["portfolios".into()])
//!     .await?;
//! assert_eq!(cache.invalidate_by_tag("portfolios").await?, 1);
//! # Ok::<(), api_optimizer::Error>(())
//! # }).unwrap();
//! ```

mod backend;
mod key;
mod manager;

pub use backend::{CacheBackend, CacheSnapshot, MemoryCache, NullCache};
pub use key::{request_path, CacheKey, CacheKeyGenerator};
pub use manager::{CacheConfig, CacheManager, CacheStats};
