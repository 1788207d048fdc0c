//! Periodic safety net that reaps instances the store's own lease expiry
//! missed (written without a lease, or with a lease longer than the desired
//! freshness window).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::registry::Registry;
use crate::shutdown::Shutdown;

pub struct Sweeper {
    registry: Arc<Registry>,
    heartbeat_timeout: Duration,
    sweep_interval: Duration,
}

impl Sweeper {
    pub fn new(registry: Arc<Registry>, heartbeat_timeout: Duration, sweep_interval: Duration) -> Self {
        Sweeper {
            registry,
            heartbeat_timeout,
            sweep_interval: sweep_interval.max(Duration::from_secs(30)),
        }
    }

    pub fn spawn(self, shutdown: Shutdown) {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(self.sweep_interval) => {}
                    _ = shutdown.cancelled() => return,
                }

                let cutoff = Utc::now()
                    - chrono::Duration::from_std(self.heartbeat_timeout)
                        .unwrap_or_else(|_| chrono::Duration::seconds(60));

                match self.registry.cleanup_stale(cutoff).await {
                    Ok(0) => {}
                    Ok(n) => tracing::info!(removed = n, "sweeper reaped stale instances"),
                    Err(e) => tracing::warn!(error = %e, "sweeper cleanup failed"),
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStoreClient;

    #[test]
    fn test_sweep_interval_floor() {
        let registry = Arc::new(Registry::new(Arc::new(InMemoryStoreClient::new())));
        let sweeper = Sweeper::new(registry, Duration::from_secs(10), Duration::from_secs(5));
        assert_eq!(sweeper.sweep_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_sweep_interval_respects_larger_value() {
        let registry = Arc::new(Registry::new(Arc::new(InMemoryStoreClient::new())));
        let sweeper = Sweeper::new(registry, Duration::from_secs(10), Duration::from_secs(90));
        assert_eq!(sweeper.sweep_interval, Duration::from_secs(90));
    }
}
