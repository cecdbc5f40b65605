//! Request metrics collection.
//!
//! ## Key Components
//!
//! | Component | Description |
//! |-----------|-------------|
//! | [`MetricRecord`] | One request outcome (endpoint, method, status, timing, caller) |
//! | [`MetricsSink`] | Trait for metric destinations |
//! | [`MetricsCollector`] | Bounded ring buffer with filtering and aggregate stats |
//! | [`TracingMetricsSink`] | Emits each record as a `tracing` event |
//! | [`CompositeMetricsSink`] | Fans records out to several sinks |
//!
//! Retention is purely count-bounded: the collector keeps the most recent
//! `max_metrics` records and computes statistics over those alone.

mod collector;

pub use collector::{EndpointCount, MetricRecord, MetricsCollector, MetricsFilter, MetricsStats};

use crate::Result;
use async_trait::async_trait;
use std::sync::Arc;

/// Destination for request metrics.
#[async_trait]
pub trait MetricsSink: Send + Sync {
    async fn record(&self, metric: MetricRecord) -> Result<()>;

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Discards everything.
pub struct NoopMetricsSink;

#[async_trait]
impl MetricsSink for NoopMetricsSink {
    async fn record(&self, _metric: MetricRecord) -> Result<()> {
        Ok(())
    }
}

/// Logs each record at `info` under the `api_optimizer::metrics` target.
#[derive(Default)]
pub struct TracingMetricsSink;

#[async_trait]
impl MetricsSink for TracingMetricsSink {
    async fn record(&self, m: MetricRecord) -> Result<()> {
        tracing::info!(
            target: "api_optimizer::metrics",
            endpoint = %m.endpoint,
            method = %m.method,
            status = m.status_code,
            response_time_ms = m.response_time,
            ip = m.ip.as_deref().unwrap_or("-"),
            "request completed"
        );
        Ok(())
    }
}

/// Composite sink for multiple destinations.
///
/// Every sink sees every record; the first error is reported after all sinks ran.
pub struct CompositeMetricsSink {
    sinks: Vec<Arc<dyn MetricsSink>>,
}
impl CompositeMetricsSink {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }
    pub fn add_sink(mut self, sink: Arc<dyn MetricsSink>) -> Self {
        self.sinks.push(sink);
        self
    }
    pub fn len(&self) -> usize {
        self.sinks.len()
    }
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}
impl Default for CompositeMetricsSink {
    fn default() -> Self {
        Self::new()
    }
}
#[async_trait]
impl MetricsSink for CompositeMetricsSink {
    async fn record(&self, metric: MetricRecord) -> Result<()> {
        let mut first_err = None;
        for s in &self.sinks {
            if let Err(e) = s.record(metric.clone()).await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }
    async fn close(&self) -> Result<()> {
        for s in &self.sinks {
            let _ = s.close().await;
        }
        Ok(())
    }
}
