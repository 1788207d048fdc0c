//! Process entrypoint: load configuration, wire the store, registry, caches,
//! lease manager, sweeper, DNS listeners and admin surface, then block until
//! a shutdown signal arrives.

use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use kong_discoveryd::admin::{self, AdminState};
use kong_discoveryd::assembler::RecordAssembler;
use kong_discoveryd::cache::Caches;
use kong_discoveryd::config::{Cli, Config};
use kong_discoveryd::dns::context::DnsServerContext;
use kong_discoveryd::dns::metrics::MetricsCollector;
use kong_discoveryd::dns::server::{DnsTcpServer, DnsUdpServer};
use kong_discoveryd::dns::upstream::UpstreamPool;
use kong_discoveryd::lease::LeaseManager;
use kong_discoveryd::registry::namespace::NamespaceStore;
use kong_discoveryd::registry::records::RecordStore;
use kong_discoveryd::registry::Registry;
use kong_discoveryd::shutdown::Shutdown;
use kong_discoveryd::store::etcd::EtcdClient;
use kong_discoveryd::store::memory::InMemoryStoreClient;
use kong_discoveryd::store::StoreClient;
use kong_discoveryd::sweeper::Sweeper;

fn build_store(config: &Config) -> Arc<dyn StoreClient> {
    match config.store.backend.as_str() {
        "etcd" => Arc::new(EtcdClient::new(
            config.store.etcd_endpoint.clone(),
            Duration::from_secs(5),
        )),
        _ => Arc::new(InMemoryStoreClient::new()),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config = Config::load(&cli)?;

    let _log_guard = kong_discoveryd::logging::init(&config.log_dir, &config.log_level);
    tracing::info!(dns_port = config.dns_port, admin_port = config.admin_port, "starting kong-discoveryd");

    let store = build_store(&config);
    let registry = Arc::new(Registry::new(store.clone()));
    let namespaces = Arc::new(NamespaceStore::new(store.clone(), registry.clone()));
    let records = Arc::new(RecordStore::new(store.clone()));
    let _leases = LeaseManager::new(store.clone());

    let caches = Arc::new(Caches::new());
    let shutdown = Shutdown::new();
    caches.spawn_watches(store.clone(), shutdown.clone());

    let assembler = Arc::new(RecordAssembler::new(
        caches,
        config.service_domain.clone(),
        config.default_ttl_seconds,
    ));

    let upstream_addrs = config.upstream_addrs()?;
    let upstreams = Arc::new(UpstreamPool::new(upstream_addrs));
    upstreams.clone().spawn_watch(store.clone(), shutdown.clone());
    let metrics = Arc::new(MetricsCollector::new());

    let dns_context = Arc::new(
        DnsServerContext::new(assembler, upstreams, metrics.clone(), config.dns_port)
            .with_listeners(config.enable_dns_udp, config.enable_dns_tcp),
    );

    let sweeper = Sweeper::new(
        registry.clone(),
        Duration::from_secs(config.heartbeat_timeout_seconds),
        Duration::from_secs(config.sweep_interval_seconds),
    );
    sweeper.spawn(shutdown.clone());

    let admin_state = Arc::new(AdminState {
        registry,
        namespaces,
        records,
        store,
        metrics,
    });

    let udp_handle = dns_context.enable_udp.then(|| {
        let udp_server = DnsUdpServer::new(dns_context.clone());
        let udp_shutdown = shutdown.clone();
        tokio::spawn(async move { udp_server.run(udp_shutdown).await })
    });
    let tcp_handle = dns_context.enable_tcp.then(|| {
        let tcp_server = DnsTcpServer::new(dns_context.clone());
        let tcp_shutdown = shutdown.clone();
        tokio::spawn(async move { tcp_server.run(tcp_shutdown).await })
    });
    let admin_handle = tokio::spawn(async move { admin::serve(config.admin_port, admin_state).await });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    shutdown.cancel();

    if let Some(handle) = udp_handle {
        let _ = handle.await;
    }
    if let Some(handle) = tcp_handle {
        let _ = handle.await;
    }
    admin_handle.abort();

    Ok(())
}
