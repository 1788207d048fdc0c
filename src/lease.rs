//! Translates Registry intents into the minimal number of store lease
//! operations. The Registry never talks to leases directly.

use std::sync::Arc;

use crate::store::{StoreClient, StoreError};

pub type Result<T> = std::result::Result<T, StoreError>;

/// Grants and refreshes leases on behalf of the Registry.
///
/// A fresh lease is granted on every heartbeat rather than reusing
/// `keep_alive` against the existing lease id. Both are spec-compliant; this
/// implementation favours the simpler one-lease-per-write model. See
/// DESIGN.md for the `keep_alive` alternative this forgoes.
pub struct LeaseManager {
    store: Arc<dyn StoreClient>,
}

impl LeaseManager {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        LeaseManager { store }
    }

    /// Grants a lease for `ttl_seconds`, or returns `None` for an unbounded
    /// (leaseless) write when `ttl_seconds == 0`.
    pub async fn grant(&self, ttl_seconds: u64) -> Result<Option<i64>> {
        if ttl_seconds == 0 {
            return Ok(None);
        }
        Ok(Some(self.store.grant_lease(ttl_seconds as i64).await?))
    }

    pub async fn revoke(&self, lease: i64) -> Result<()> {
        self.store.revoke_lease(lease).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStoreClient;

    #[tokio::test]
    async fn test_zero_ttl_grants_no_lease() {
        let mgr = LeaseManager::new(Arc::new(InMemoryStoreClient::new()));
        assert_eq!(mgr.grant(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_positive_ttl_grants_lease() {
        let mgr = LeaseManager::new(Arc::new(InMemoryStoreClient::new()));
        let lease = mgr.grant(30).await.unwrap();
        assert!(lease.is_some());
    }
}
