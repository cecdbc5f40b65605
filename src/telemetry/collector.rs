//! Bounded in-memory request metrics.

use super::MetricsSink;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

/// Outcome of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricRecord {
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    /// Milliseconds spent in the wrapped chain.
    pub response_time: u64,
    /// Epoch milliseconds at which the request finished.
    pub timestamp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

impl MetricRecord {
    pub fn new(
        endpoint: impl Into<String>,
        method: impl Into<String>,
        status_code: u16,
        response_time: u64,
        timestamp: u64,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            method: method.into(),
            status_code,
            response_time,
            timestamp,
            ip: None,
            user_agent: None,
        }
    }
    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }
    pub fn with_user_agent(mut self, ua: impl Into<String>) -> Self {
        self.user_agent = Some(ua.into());
        self
    }
    pub fn is_error(&self) -> bool {
        self.status_code >= 400
    }
}

/// Selection criteria for [`MetricsCollector::metrics`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsFilter {
    pub endpoint: Option<String>,
    pub status_code: Option<u16>,
    /// Inclusive `(start, end)` bounds in epoch milliseconds.
    pub time_range: Option<(u64, u64)>,
}

impl MetricsFilter {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
    pub fn with_status_code(mut self, status: u16) -> Self {
        self.status_code = Some(status);
        self
    }
    pub fn with_time_range(mut self, start: u64, end: u64) -> Self {
        self.time_range = Some((start, end));
        self
    }

    fn matches(&self, m: &MetricRecord) -> bool {
        self.endpoint.as_deref().map_or(true, |e| m.endpoint == e)
            && self.status_code.map_or(true, |s| m.status_code == s)
            && self
                .time_range
                .map_or(true, |(start, end)| m.timestamp >= start && m.timestamp <= end)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointCount {
    pub endpoint: String,
    pub count: usize,
}

/// Aggregates over the retained window only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsStats {
    pub total_requests: usize,
    pub average_response_time: f64,
    pub error_rate: f64,
    pub top_endpoints: Vec<EndpointCount>,
}

/// Ring buffer of the most recent `max_metrics` request records.
pub struct MetricsCollector {
    records: RwLock<VecDeque<MetricRecord>>,
    max_metrics: usize,
    top_endpoints: usize,
}

impl MetricsCollector {
    pub const DEFAULT_MAX_METRICS: usize = 1000;
    pub const DEFAULT_TOP_ENDPOINTS: usize = 10;

    pub fn new(max_metrics: usize) -> Self {
        Self {
            records: RwLock::new(VecDeque::with_capacity(max_metrics.min(4096))),
            max_metrics,
            top_endpoints: Self::DEFAULT_TOP_ENDPOINTS,
        }
    }

    pub fn with_top_endpoints(mut self, n: usize) -> Self {
        self.top_endpoints = n;
        self
    }

    pub fn max_metrics(&self) -> usize {
        self.max_metrics
    }

    pub async fn record(&self, metric: MetricRecord) {
        let mut records = self.records.write().await;
        records.push_back(metric);
        while records.len() > self.max_metrics {
            records.pop_front();
        }
    }

    /// Retained records matching `filter`, oldest first.
    pub async fn metrics(&self, filter: Option<&MetricsFilter>) -> Vec<MetricRecord> {
        let records = self.records.read().await;
        match filter {
            Some(f) => records.iter().filter(|m| f.matches(m)).cloned().collect(),
            None => records.iter().cloned().collect(),
        }
    }

    pub async fn stats(&self) -> MetricsStats {
        let records = self.records.read().await;
        let total = records.len();
        if total == 0 {
            return MetricsStats::default();
        }

        let total_time: u64 = records.iter().map(|m| m.response_time).sum();
        let errors = records.iter().filter(|m| m.is_error()).count();
        let mut counts: HashMap<&str, usize> = HashMap::new();
        for m in records.iter() {
            *counts.entry(m.endpoint.as_str()).or_insert(0) += 1;
        }
        let mut top: Vec<EndpointCount> = counts
            .into_iter()
            .map(|(endpoint, count)| EndpointCount {
                endpoint: endpoint.to_string(),
                count,
            })
            .collect();
        top.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.endpoint.cmp(&b.endpoint)));
        top.truncate(self.top_endpoints);

        MetricsStats {
            total_requests: total,
            average_response_time: total_time as f64 / total as f64,
            error_rate: errors as f64 / total as f64,
            top_endpoints: top,
        }
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn clear(&self) {
        self.records.write().await.clear();
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_METRICS)
    }
}

#[async_trait]
impl MetricsSink for MetricsCollector {
    async fn record(&self, metric: MetricRecord) -> Result<()> {
        MetricsCollector::record(self, metric).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(endpoint: &str, status: u16, time: u64, ts: u64) -> MetricRecord {
        MetricRecord::new(endpoint, "GET", status, time, ts)
    }

    #[tokio::test]
    async fn test_cap_keeps_most_recent_in_order() {
        let collector = MetricsCollector::new(5);
        for i in 0..8u64 {
            collector.record(rec("/a", 200, i, i)).await;
        }
        let kept = collector.metrics(None).await;
        assert_eq!(kept.len(), 5);
        let ts: Vec<u64> = kept.iter().map(|m| m.timestamp).collect();
        assert_eq!(ts, vec![3, 4, 5, 6, 7]);
    }

    #[tokio::test]
    async fn test_default_cap_is_1000() {
        let collector = MetricsCollector::default();
        for i in 0..1010u64 {
            collector.record(rec("/a", 200, 1, i)).await;
        }
        let kept = collector.metrics(None).await;
        assert_eq!(kept.len(), 1000);
        assert_eq!(kept.first().map(|m| m.timestamp), Some(10));
        assert_eq!(kept.last().map(|m| m.timestamp), Some(1009));
    }

    #[tokio::test]
    async fn test_filters_combine() {
        let collector = MetricsCollector::new(100);
        collector.record(rec("/a", 200, 10, 100)).await;
        collector.record(rec("/a", 500, 10, 200)).await;
        collector.record(rec("/b", 200, 10, 300)).await;
        collector.record(rec("/a", 200, 10, 400)).await;

        let f = MetricsFilter::new().with_endpoint("/a");
        assert_eq!(collector.metrics(Some(&f)).await.len(), 3);

        let f = MetricsFilter::new().with_endpoint("/a").with_status_code(200);
        assert_eq!(collector.metrics(Some(&f)).await.len(), 2);

        // bounds are inclusive
        let f = MetricsFilter::new().with_time_range(200, 300);
        let ts: Vec<u64> = collector.metrics(Some(&f)).await.iter().map(|m| m.timestamp).collect();
        assert_eq!(ts, vec![200, 300]);

        let f = MetricsFilter::new().with_endpoint("/a").with_time_range(150, 450).with_status_code(200);
        assert_eq!(collector.metrics(Some(&f)).await.len(), 1);
    }

    #[tokio::test]
    async fn test_stats() {
        let collector = MetricsCollector::new(100);
        collector.record(rec("/a", 200, 10, 1)).await;
        collector.record(rec("/a", 404, 20, 2)).await;
        collector.record(rec("/b", 500, 30, 3)).await;
        collector.record(rec("/c", 201, 40, 4)).await;
        collector.record(rec("/b", 200, 50, 5)).await;
        collector.record(rec("/a", 200, 30, 6)).await;

        let stats = collector.stats().await;
        assert_eq!(stats.total_requests, 6);
        assert_eq!(stats.average_response_time, 30.0);
        assert!((stats.error_rate - 2.0 / 6.0).abs() < f64::EPSILON);
        let top: Vec<(&str, usize)> = stats
            .top_endpoints
            .iter()
            .map(|e| (e.endpoint.as_str(), e.count))
            .collect();
        assert_eq!(top, vec![("/a", 3), ("/b", 2), ("/c", 1)]);
    }

    #[tokio::test]
    async fn test_stats_cover_retained_window_only() {
        let collector = MetricsCollector::new(2);
        collector.record(rec("/old", 500, 1000, 1)).await;
        collector.record(rec("/a", 200, 10, 2)).await;
        collector.record(rec("/a", 200, 20, 3)).await;
        let stats = collector.stats().await;
        assert_eq!(stats.total_requests, 2);
        assert_eq!(stats.error_rate, 0.0);
        assert_eq!(stats.average_response_time, 15.0);
    }

    #[tokio::test]
    async fn test_empty_stats_and_clear() {
        let collector = MetricsCollector::new(10).with_top_endpoints(1);
        assert_eq!(collector.stats().await, MetricsStats::default());
        collector.record(rec("/a", 200, 1, 1)).await;
        collector.record(rec("/b", 200, 1, 1)).await;
        assert_eq!(collector.stats().await.top_endpoints.len(), 1);
        collector.clear().await;
        assert!(collector.is_empty().await);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let m = rec("/a", 200, 5, 9).with_user_agent("curl/8");
        let json = serde_json::to_value(&m).unwrap();
        assert_eq!(json["statusCode"], 200);
        assert_eq!(json["responseTime"], 5);
        assert_eq!(json["userAgent"], "curl/8");
        assert!(json.get("ip").is_none());
    }
}
