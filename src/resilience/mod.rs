//! Request admission control.
//!
//! # Rate Limiting
//!
//! [`FixedWindowLimiter`] counts requests per caller in fixed windows: the first
//! request opens a window of `window` length, up to `requests` calls are admitted
//! inside it, and the count resets when the window closes. State is O(1) per
//! (identifier, config) pair.
//!
//! ```rust
//! use api_optimizer::resilience::{FixedWindowLimiter, RateLimitConfig};
//!
//! # tokio_test::block_on(async {
//! let limiter = FixedWindowLimiter::new();
//! let config = RateLimitConfig::per_minute(100);
//!
//! if limiter.is_allowed("203.0.113.7", &config).await {
//!     // Proceed with request...
//! }
//! # });
//! ```

pub mod rate_limiter;

pub use rate_limiter::{FixedWindowLimiter, RateLimitConfig, RateLimitDecision, RateLimiterSnapshot};
