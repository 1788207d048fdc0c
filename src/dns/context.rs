//! Shared state handed to every connection handler: the watch-driven caches,
//! the record assembler, the upstream pool, the response cache and counters.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::assembler::RecordAssembler;
use crate::dns::cache::SynchronizedCache;
use crate::dns::metrics::MetricsCollector;
use crate::dns::upstream::UpstreamPool;

pub struct ServerStatistics {
    pub tcp_query_count: AtomicUsize,
    pub udp_query_count: AtomicUsize,
}

impl Default for ServerStatistics {
    fn default() -> Self {
        ServerStatistics {
            tcp_query_count: AtomicUsize::new(0),
            udp_query_count: AtomicUsize::new(0),
        }
    }
}

impl ServerStatistics {
    pub fn get_tcp_query_count(&self) -> usize {
        self.tcp_query_count.load(Ordering::Acquire)
    }

    pub fn get_udp_query_count(&self) -> usize {
        self.udp_query_count.load(Ordering::Acquire)
    }
}

/// Everything the UDP and TCP listeners need to answer a query, bundled so
/// it can be cheaply cloned (via `Arc`) into each connection task.
pub struct DnsServerContext {
    pub assembler: Arc<RecordAssembler>,
    pub response_cache: SynchronizedCache,
    pub upstreams: Arc<UpstreamPool>,
    pub metrics: Arc<MetricsCollector>,
    pub dns_port: u16,
    pub allow_recursive: bool,
    pub enable_udp: bool,
    pub enable_tcp: bool,
    pub statistics: ServerStatistics,
}

impl DnsServerContext {
    pub fn new(
        assembler: Arc<RecordAssembler>,
        upstreams: Arc<UpstreamPool>,
        metrics: Arc<MetricsCollector>,
        dns_port: u16,
    ) -> Self {
        DnsServerContext {
            assembler,
            response_cache: SynchronizedCache::new(),
            upstreams,
            metrics,
            dns_port,
            allow_recursive: true,
            enable_udp: true,
            enable_tcp: true,
            statistics: ServerStatistics::default(),
        }
    }

    /// Overrides which listeners the daemon should start; both default to
    /// `true`.
    pub fn with_listeners(mut self, enable_udp: bool, enable_tcp: bool) -> Self {
        self.enable_udp = enable_udp;
        self.enable_tcp = enable_tcp;
        self
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;
    use crate::cache::Caches;

    pub fn create_test_context() -> Arc<DnsServerContext> {
        let caches = Arc::new(Caches::new());
        let assembler = Arc::new(RecordAssembler::new(caches, "service.local".to_string(), 30));
        Arc::new(DnsServerContext::new(
            assembler,
            Arc::new(UpstreamPool::new(vec![])),
            Arc::new(MetricsCollector::new()),
            0,
        ))
    }
}
