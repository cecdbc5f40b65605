//! Operational endpoint over the shared stores.

use super::collect_stats;
use crate::cache::CacheManager;
use crate::middleware::{Handler, Method, Request, Response};
use crate::telemetry::MetricsCollector;
use crate::Result;
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use tracing::info;

/// Admin handler for dashboards and operators.
///
/// - `GET`/`HEAD`: stats JSON
/// - `DELETE`: clear every cache entry
/// - `DELETE ?tag=<t>`: invalidate one tag, answering `{"invalidated": n}`
///
/// Anything else gets a 405.
pub struct StatsHandler {
    cache: Arc<CacheManager>,
    metrics: Arc<MetricsCollector>,
}

impl StatsHandler {
    pub fn new(cache: Arc<CacheManager>, metrics: Arc<MetricsCollector>) -> Self {
        Self { cache, metrics }
    }
}

#[async_trait]
impl Handler for StatsHandler {
    async fn call(&self, req: Request) -> Result<Response> {
        match req.method {
            Method::Get | Method::Head => {
                let stats = collect_stats(&self.cache, &self.metrics).await?;
                Response::json(200, &stats)
            }
            Method::Delete => match req.query_param("tag") {
                Some(tag) => {
                    let removed = self.cache.invalidate_by_tag(&tag).await?;
                    info!(tag = %tag, removed, "cache tag invalidated via admin endpoint");
                    Response::json(200, &json!({ "invalidated": removed }))
                }
                None => {
                    self.cache.clear().await?;
                    info!("caches cleared via admin endpoint");
                    Response::json(200, &json!({ "cleared": true }))
                }
            },
            _ => Ok(Response::new(405).with_header("allow", "GET, HEAD, DELETE")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, CacheKey, MemoryCache};
    use crate::telemetry::MetricRecord;
    use std::time::Duration;

    async fn fixture() -> (StatsHandler, Arc<CacheManager>) {
        let cache = Arc::new(CacheManager::new(CacheConfig::new(), Arc::new(MemoryCache::new(8))));
        let metrics = Arc::new(MetricsCollector::new(8));
        let ttl = Duration::from_secs(60);
        cache.set_with_ttl(&CacheKey::from("a"), &1, ttl, &["x".into()]).await.unwrap();
        cache.set_with_ttl(&CacheKey::from("b"), &2, ttl, &["y".into()]).await.unwrap();
        metrics.record(MetricRecord::new("/p", "GET", 200, 10, 1)).await;
        metrics.record(MetricRecord::new("/p", "GET", 500, 30, 2)).await;
        (StatsHandler::new(cache.clone(), metrics), cache)
    }

    #[tokio::test]
    async fn test_get_returns_stats() {
        let (handler, _) = fixture().await;
        let resp = handler.call(Request::get("/admin/stats")).await.unwrap();
        assert_eq!(resp.status, 200);
        let body: serde_json::Value = resp.body_json().unwrap();
        assert_eq!(body["cache"]["size"], 2);
        assert_eq!(body["cache"]["keys"], json!(["a", "b"]));
        assert_eq!(body["metrics"]["totalRequests"], 2);
        assert_eq!(body["metrics"]["averageResponseTime"], 20.0);
        assert_eq!(body["metrics"]["errorRate"], 0.5);
        assert_eq!(body["metrics"]["topEndpoints"][0]["endpoint"], "/p");
    }

    #[tokio::test]
    async fn test_delete_by_tag_then_all() {
        let (handler, cache) = fixture().await;
        let resp = handler
            .call(Request::new(Method::Delete, "/admin/stats?tag=x"))
            .await
            .unwrap();
        let body: serde_json::Value = resp.body_json().unwrap();
        assert_eq!(body, json!({ "invalidated": 1 }));
        assert_eq!(cache.snapshot().await.unwrap().keys, vec!["b".to_string()]);

        handler.call(Request::new(Method::Delete, "/admin/stats")).await.unwrap();
        assert_eq!(cache.snapshot().await.unwrap().size, 0);
    }

    #[tokio::test]
    async fn test_other_methods_not_allowed() {
        let (handler, _) = fixture().await;
        let resp = handler.call(Request::new(Method::Post, "/admin/stats")).await.unwrap();
        assert_eq!(resp.status, 405);
        assert_eq!(resp.header("Allow"), Some("GET, HEAD, DELETE"));
    }
}
