//! Prometheus metrics for query handling, the response cache, and upstream
//! forwarding.

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge,
    register_int_gauge_vec, Encoder, HistogramVec, IntCounterVec, IntGauge, IntGaugeVec,
    Registry, TextEncoder,
};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

lazy_static! {
    pub static ref DNS_QUERIES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kong_discovery_dns_queries_total",
        "Total number of DNS queries received",
        &["protocol", "query_type"]
    )
    .unwrap();

    pub static ref DNS_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kong_discovery_dns_responses_total",
        "Total number of DNS responses sent",
        &["response_code", "protocol"]
    )
    .unwrap();

    pub static ref DNS_QUERY_DURATION: HistogramVec = register_histogram_vec!(
        "kong_discovery_dns_query_duration_seconds",
        "DNS query processing duration in seconds",
        &["protocol", "source"],
        vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    pub static ref DNS_CACHE_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "kong_discovery_dns_cache_operations_total",
        "Response cache operations (hit/miss/eviction)",
        &["operation", "record_type"]
    )
    .unwrap();

    pub static ref DNS_CACHE_SIZE: IntGaugeVec = register_int_gauge_vec!(
        "kong_discovery_dns_cache_size",
        "Current number of entries in the response cache",
        &["cache_type"]
    )
    .unwrap();

    pub static ref ACTIVE_CONNECTIONS: IntGaugeVec = register_int_gauge_vec!(
        "kong_discovery_active_connections",
        "Current number of active connections",
        &["protocol"]
    )
    .unwrap();

    pub static ref UPSTREAM_QUERIES: IntCounterVec = register_int_counter_vec!(
        "kong_discovery_upstream_queries_total",
        "Queries forwarded to upstream DNS servers",
        &["upstream", "status"]
    )
    .unwrap();

    pub static ref UPSTREAM_DURATION: HistogramVec = register_histogram_vec!(
        "kong_discovery_upstream_duration_seconds",
        "Upstream DNS query duration",
        &["upstream"],
        vec![0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0]
    )
    .unwrap();

    pub static ref REGISTRY_OPERATIONS: IntCounterVec = register_int_counter_vec!(
        "kong_discovery_registry_operations_total",
        "Registry operations (register/deregister/heartbeat)",
        &["operation", "result"]
    )
    .unwrap();

    pub static ref SWEEPER_REAPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kong_discovery_sweeper_reaped_total",
        "Instances removed by the liveness sweeper",
        &["namespace"]
    )
    .unwrap();

    pub static ref ERRORS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "kong_discovery_errors_total",
        "Total errors by component and type",
        &["component", "error_type"]
    )
    .unwrap();

    pub static ref SERVER_UPTIME: IntGauge = register_int_gauge!(
        "kong_discovery_uptime_seconds",
        "Process uptime in seconds"
    )
    .unwrap();
}

/// Running cache-hit/miss counters kept alongside the Prometheus vectors so
/// the admin surface can report a hit rate without scraping `/metrics`.
pub struct MetricsTracker {
    cache_hits: Arc<RwLock<u64>>,
    cache_misses: Arc<RwLock<u64>>,
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsTracker {
    pub fn new() -> Self {
        MetricsTracker {
            cache_hits: Arc::new(RwLock::new(0)),
            cache_misses: Arc::new(RwLock::new(0)),
        }
    }

    pub fn track_cache_hit(&self, record_type: &str) {
        if let Ok(mut hits) = self.cache_hits.write() {
            *hits += 1;
        }
        DNS_CACHE_OPERATIONS.with_label_values(&["hit", record_type]).inc();
    }

    pub fn track_cache_miss(&self, record_type: &str) {
        if let Ok(mut misses) = self.cache_misses.write() {
            *misses += 1;
        }
        DNS_CACHE_OPERATIONS.with_label_values(&["miss", record_type]).inc();
    }

    pub fn cache_hit_rate(&self) -> f64 {
        let hits = *self.cache_hits.read().unwrap_or_else(|e| e.into_inner());
        let misses = *self.cache_misses.read().unwrap_or_else(|e| e.into_inner());
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64 * 100.0
        }
    }
}

pub struct MetricsCollector {
    start_time: Instant,
    registry: Registry,
    tracker: Arc<MetricsTracker>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        MetricsCollector {
            start_time: Instant::now(),
            registry: Registry::new(),
            tracker: Arc::new(MetricsTracker::new()),
        }
    }

    pub fn tracker(&self) -> Arc<MetricsTracker> {
        self.tracker.clone()
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn update_uptime(&self) {
        SERVER_UPTIME.set(self.start_time.elapsed().as_secs() as i64);
    }

    pub fn record_dns_query(&self, protocol: &str, query_type: &str) {
        DNS_QUERIES_TOTAL.with_label_values(&[protocol, query_type]).inc();
    }

    pub fn record_dns_response(&self, response_code: &str, protocol: &str) {
        DNS_RESPONSES_TOTAL.with_label_values(&[response_code, protocol]).inc();
    }

    pub fn record_query_duration(&self, duration: Duration, protocol: &str, source: &str) {
        DNS_QUERY_DURATION
            .with_label_values(&[protocol, source])
            .observe(duration.as_secs_f64());
    }

    pub fn update_cache_size(&self, cache_type: &str, size: i64) {
        DNS_CACHE_SIZE.with_label_values(&[cache_type]).set(size);
    }

    pub fn update_active_connections(&self, protocol: &str, count: i64) {
        ACTIVE_CONNECTIONS.with_label_values(&[protocol]).set(count);
    }

    pub fn record_upstream_query(&self, upstream: &str, status: &str) {
        UPSTREAM_QUERIES.with_label_values(&[upstream, status]).inc();
    }

    pub fn record_upstream_duration(&self, upstream: &str, duration: Duration) {
        UPSTREAM_DURATION
            .with_label_values(&[upstream])
            .observe(duration.as_secs_f64());
    }

    pub fn record_registry_operation(&self, operation: &str, result: &str) {
        REGISTRY_OPERATIONS.with_label_values(&[operation, result]).inc();
    }

    pub fn record_sweeper_reaped(&self, namespace: &str, count: u64) {
        SWEEPER_REAPED_TOTAL
            .with_label_values(&[namespace])
            .inc_by(count);
    }

    pub fn record_error(&self, component: &str, error_type: &str) {
        ERRORS_TOTAL.with_label_values(&[component, error_type]).inc();
    }

    pub fn export_metrics(&self) -> Result<String, Box<dyn std::error::Error>> {
        self.update_uptime();
        let encoder = TextEncoder::new();
        let metric_families = prometheus::gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new();
        assert!(collector.start_time.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_dns_query_recording() {
        let collector = MetricsCollector::new();
        collector.record_dns_query("udp", "A");
        collector.record_dns_response("NOERROR", "udp");
        let metrics = collector.export_metrics().unwrap();
        assert!(metrics.contains("kong_discovery_dns_queries_total"));
        assert!(metrics.contains("kong_discovery_dns_responses_total"));
    }

    #[test]
    fn test_cache_hit_rate_tracking() {
        let tracker = MetricsTracker::new();
        tracker.track_cache_hit("A");
        tracker.track_cache_hit("A");
        tracker.track_cache_miss("AAAA");
        assert!((tracker.cache_hit_rate() - 66.66).abs() < 1.0);
    }

    #[test]
    fn test_metrics_export_contains_uptime_and_cache_size() {
        let collector = MetricsCollector::new();
        collector.update_cache_size("response", 10);
        let exported = collector.export_metrics().unwrap();
        assert!(exported.contains("kong_discovery_uptime_seconds"));
        assert!(exported.contains("kong_discovery_dns_cache_size"));
    }
}
