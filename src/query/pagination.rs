//! Pagination parameter normalization and response envelopes.

use serde::{Deserialize, Serialize};
use url::Url;

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_LIMIT: u32 = 10;
pub const DEFAULT_MAX_LIMIT: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginationParams {
    pub page: u32,
    pub limit: u32,
    pub offset: u64,
}

impl PaginationParams {
    pub fn new(page: u32, limit: u32) -> Self {
        let page = page.max(1);
        let limit = limit.max(1);
        Self {
            page,
            limit,
            offset: (page as u64 - 1) * limit as u64,
        }
    }
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE, DEFAULT_LIMIT)
    }
}

/// Raw `page`/`limit` as they arrive in a query string.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PaginationQuery {
    pub page: Option<String>,
    pub limit: Option<String>,
}

impl PaginationQuery {
    pub fn params(&self, max_limit: u32) -> PaginationParams {
        get_pagination_params(self.page.as_deref(), self.limit.as_deref(), max_limit)
    }
}

/// Parses a positive integer; zero, garbage and absence all yield `None`.
fn parse_raw(raw: Option<&str>) -> Option<i64> {
    raw.and_then(|s| s.trim().parse::<i64>().ok()).filter(|v| *v != 0)
}

/// Normalize untrusted page/limit input.
///
/// Missing, unparseable or zero values fall back to page 1 / limit 10; negative
/// values clamp to 1 and limits clamp to `max_limit`. Never fails.
pub fn get_pagination_params(
    raw_page: Option<&str>,
    raw_limit: Option<&str>,
    max_limit: u32,
) -> PaginationParams {
    let max_limit = max_limit.max(1) as i64;
    let page = parse_raw(raw_page)
        .unwrap_or(DEFAULT_PAGE as i64)
        .clamp(1, u32::MAX as i64);
    let limit = parse_raw(raw_limit)
        .unwrap_or(DEFAULT_LIMIT as i64)
        .clamp(1, max_limit);
    PaginationParams::new(page as u32, limit as u32)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageInfo {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u64,
    pub has_next: bool,
    pub has_prev: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prev_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaginatedResponse<T> {
    pub data: Vec<T>,
    pub pagination: PageInfo,
}

/// Wrap one page of `data` with navigation metadata.
///
/// Links are only produced when `base_url` is given, and only toward pages that
/// exist. Existing query parameters on `base_url` are kept; `page` and `limit`
/// are replaced. A relative `base_url` yields relative links.
pub fn build_paginated_response<T>(
    data: Vec<T>,
    total: u64,
    page: u32,
    limit: u32,
    base_url: Option<&str>,
) -> PaginatedResponse<T> {
    let limit = limit.max(1);
    let total_pages = total.div_ceil(limit as u64);
    let has_next = (page as u64) < total_pages;
    let has_prev = page > 1;

    let (next_url, prev_url) = match base_url {
        Some(base) => (
            has_next.then(|| page_url(base, page.saturating_add(1), limit)).flatten(),
            has_prev.then(|| page_url(base, page - 1, limit)).flatten(),
        ),
        None => (None, None),
    };

    PaginatedResponse {
        data,
        pagination: PageInfo {
            page,
            limit,
            total,
            total_pages,
            has_next,
            has_prev,
            next_url,
            prev_url,
        },
    }
}

const RELATIVE_BASE: &str = "http://relative.invalid";

fn page_url(base: &str, page: u32, limit: u32) -> Option<String> {
    let (mut url, relative) = match Url::parse(base) {
        Ok(u) => (u, false),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            (Url::parse(RELATIVE_BASE).ok()?.join(base).ok()?, true)
        }
        Err(_) => return None,
    };

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| k != "page" && k != "limit")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    url.query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("page", &page.to_string())
        .append_pair("limit", &limit.to_string());

    if relative {
        let query = url.query().map(|q| format!("?{}", q)).unwrap_or_default();
        Some(format!("{}{}", url.path(), query))
    } else {
        Some(url.to_string())
    }
}
