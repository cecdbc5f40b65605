//! Request pipeline: caching, throttling and metrics around a handler.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`Handler`] | Terminal business logic, `Request -> Result<Response>` |
//! | [`Middleware`] / [`Next`] | One stage of a chain and the rest of it |
//! | [`PipelineConfig`] | Which stages are enabled, loadable from YAML/JSON |
//! | [`PipelineBuilder`] | Turns a config plus shared stores into a [`ComposedHandler`] |
//! | [`CacheLayer`] | Short-circuits repeated GET requests |
//! | [`RateLimitLayer`] | Rejects over-quota callers with 429 |
//! | [`MetricsLayer`] | Records one metric per request that reaches the handler |
//!
//! Stage order is fixed: cache, then rate limit, then metrics, then handler.
//!
//! ## Response headers
//!
//! | Header | Set by | Value |
//! |--------|--------|-------|
//! | `X-Cache` | cache | `HIT` or `MISS` |
//! | `Vary` | cache | `Accept-Encoding` when the client negotiates compression |
//! | `X-RateLimit-Limit` | rate limit | window quota |
//! | `X-RateLimit-Remaining` | rate limit | quota left after this request |
//! | `X-RateLimit-Reset` | rate limit | window end, epoch seconds |
//! | `Retry-After` | rate limit | seconds until reset, on 429 only |
//! | `X-Response-Time` | metrics | e.g. `12ms` |

mod compose;
mod config;
mod handler;
mod layers;
mod request;

pub use compose::{ComposedHandler, PipelineBuilder};
pub use config::{CacheStage, PipelineConfig, RateLimitStage};
pub use handler::{handler_fn, FnHandler, Handler, Middleware, Next};
pub use layers::{CacheLayer, MetricsLayer, RateLimitLayer};
pub use request::{Headers, Method, Request, Response};

use std::sync::Arc;

/// Maps a request to a rate-limit identity; `None` defers to the client address.
pub type IdentifierResolver = Arc<dyn Fn(&Request) -> Option<String> + Send + Sync>;

/// Shared bucket for callers with no resolvable identity.
pub const ANONYMOUS: &str = "anonymous";

pub const X_CACHE: &str = "x-cache";
pub const VARY: &str = "vary";
pub const X_RATELIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const X_RATELIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const X_RATELIMIT_RESET: &str = "x-ratelimit-reset";
pub const RETRY_AFTER: &str = "retry-after";
pub const X_RESPONSE_TIME: &str = "x-response-time";
