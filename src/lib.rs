//! # api-optimizer
//!
//! Composable optimization layer for request handlers: response caching with
//! TTL and tag invalidation, per-caller fixed-window rate limiting, bounded
//! request metrics, and stateless query helpers for batching and pagination.
//!
//! ## Overview
//!
//! The crate wraps an abstract [`Handler`](middleware::Handler) (a function
//! from [`Request`](middleware::Request) to [`Response`](middleware::Response))
//! in up to three stages, always in the same order:
//!
//! ```text
//! cache -> rate limit -> metrics -> handler
//! ```
//!
//! Cache hits therefore never consume rate-limit quota and never produce a
//! metric. All shared state lives in an explicitly constructed
//! [`ApiOptimizer`]; nothing is process-global.
//!
//! ## Failure policy
//!
//! - Cache failures degrade to a miss and are logged
//! - A rate-limit rejection is a normal 429 response, not an error
//! - Handler errors are recorded as metrics and returned unchanged
//! - Metric recording failures are logged and never reach the caller
//!
//! ## Quick Start
//!
//! ```rust
//! use api_optimizer::middleware::{handler_fn, PipelineConfig, Request, Response};
//! use api_optimizer::{ApiOptimizer, OptimizerConfig};
//! use std::time::Duration;
//!
//! # tokio_test::block_on(async {
//! let optimizer = ApiOptimizer::new(OptimizerConfig::default())?;
//!
//! let portfolios = optimizer
//!     .pipeline(
//!         PipelineConfig::new()
//!             .with_cache(Duration::from_secs(60), &["portfolios"])
//!             .with_rate_limit(100, Duration::from_secs(60))
//!             .with_metrics(true),
//!     )
//!     .build(handler_fn(|_req| async { Ok(Response::ok("[]")) }))?;
//!
//! let first = portfolios.handle(Request::get("/api/portfolios")).await?;
//! assert_eq!(first.header("X-Cache"), Some("MISS"));
//! let second = portfolios.handle(Request::get("/api/portfolios")).await?;
//! assert_eq!(second.header("X-Cache"), Some("HIT"));
//!
//! optimizer.invalidate_cache("portfolios").await?;
//! # Ok::<(), api_optimizer::Error>(())
//! # }).unwrap();
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`cache`] | TTL cache store with tag index, key derivation, typed manager |
//! | [`resilience`] | Fixed-window rate limiter |
//! | [`telemetry`] | Bounded metrics collector and metric sinks |
//! | [`query`] | Concurrent batching and pagination helpers |
//! | [`middleware`] | Request/response types, stages and pipeline composition |
//! | [`optimizer`] | Shared state, lifecycle, configuration and admin endpoint |
//! | [`clock`] | Injectable time source |
//! | [`scheduler`] | Injectable timers for eager cache expiry |

pub mod cache;
pub mod clock;
pub mod middleware;
pub mod optimizer;
pub mod query;
pub mod resilience;
pub mod scheduler;
pub mod telemetry;

// Re-export main types for convenience
pub use middleware::{ComposedHandler, Handler, PipelineBuilder, PipelineConfig, Request, Response};
pub use optimizer::{ApiOptimizer, OptimizerConfig, OptimizerStats, StatsHandler};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
