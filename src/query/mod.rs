//! Stateless query helpers.
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`batch_queries`] | Run independent reads concurrently, fail fast |
//! | [`batch_queries_limited`] | Same, with bounded concurrency |
//! | [`BatchExecutor`] | Strategy-driven execution, fail-fast or settled |
//! | [`get_pagination_params`] | Clamp untrusted page/limit input |
//! | [`build_paginated_response`] | Page envelope with navigation links |
//!
//! ```rust
//! use api_optimizer::query::{build_paginated_response, get_pagination_params};
//!
//! let params = get_pagination_params(Some("2"), Some("10"), 100);
//! assert_eq!(params.offset, 10);
//!
//! let page = build_paginated_response(vec!["p11", "p12"], 25, params.page, params.limit, None);
//! assert_eq!(page.pagination.total_pages, 3);
//! ```

mod batch;
mod pagination;

pub use batch::{batch_queries, batch_queries_limited, BatchExecutor, BatchResult, BatchStrategy};
pub use pagination::{
    build_paginated_response, get_pagination_params, PageInfo, PaginatedResponse,
    PaginationParams, PaginationQuery, DEFAULT_LIMIT, DEFAULT_MAX_LIMIT, DEFAULT_PAGE,
};
