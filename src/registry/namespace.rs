//! Namespace CRUD. `service_count` is never persisted redundantly; it is
//! derived live from the Registry's name index on read.

use std::sync::Arc;

use chrono::Utc;

use super::{Registry, RegistryError, Result};
use crate::model::Namespace;
use crate::store::StoreClient;

const NAMESPACES_PREFIX: &str = "/namespaces/";

fn namespace_key(name: &str) -> String {
    format!("{NAMESPACES_PREFIX}{name}")
}

pub struct NamespaceStore {
    store: Arc<dyn StoreClient>,
    registry: Arc<Registry>,
}

#[derive(Debug, Clone)]
pub struct NamespaceView {
    pub namespace: Namespace,
    pub service_count: usize,
}

impl NamespaceStore {
    pub fn new(store: Arc<dyn StoreClient>, registry: Arc<Registry>) -> Self {
        NamespaceStore { store, registry }
    }

    pub async fn create(&self, name: &str, description: &str) -> Result<Namespace> {
        if self.store.get(&namespace_key(name)).await?.is_some() {
            return Err(RegistryError::AlreadyExists);
        }

        let ns = Namespace {
            name: name.to_string(),
            description: description.to_string(),
            created_at: Utc::now(),
        };
        self.store
            .put(&namespace_key(name), serde_json::to_vec(&ns)?)
            .await?;
        Ok(ns)
    }

    pub async fn get(&self, name: &str) -> Result<NamespaceView> {
        let kv = self
            .store
            .get(&namespace_key(name))
            .await?
            .ok_or(RegistryError::NotFound)?;
        let namespace: Namespace = serde_json::from_slice(&kv.value)?;
        let service_count = self.registry.list_by_namespace(name).await?.len();
        Ok(NamespaceView {
            namespace,
            service_count,
        })
    }

    pub async fn list(&self) -> Result<Vec<NamespaceView>> {
        let kvs = self.store.get_prefix(NAMESPACES_PREFIX).await?;
        let mut views = Vec::with_capacity(kvs.len());
        for kv in kvs {
            let namespace: Namespace = serde_json::from_slice(&kv.value)?;
            let service_count = self.registry.list_by_namespace(&namespace.name).await?.len();
            views.push(NamespaceView {
                namespace,
                service_count,
            });
        }
        Ok(views)
    }

    pub async fn delete(&self, name: &str) -> Result<()> {
        let view = self.get(name).await?;
        if view.service_count > 0 {
            return Err(RegistryError::NamespaceNotEmpty);
        }
        self.store.delete(&namespace_key(name)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStoreClient;
    use std::collections::HashMap;

    fn setup() -> (NamespaceStore, Arc<Registry>) {
        let store = Arc::new(InMemoryStoreClient::new());
        let registry = Arc::new(Registry::new(store.clone()));
        (NamespaceStore::new(store, registry.clone()), registry)
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let (ns_store, _registry) = setup();
        ns_store.create("prod", "production traffic").await.unwrap();
        let view = ns_store.get("prod").await.unwrap();
        assert_eq!(view.namespace.description, "production traffic");
        assert_eq!(view.service_count, 0);
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate() {
        let (ns_store, _registry) = setup();
        ns_store.create("prod", "").await.unwrap();
        let err = ns_store.create("prod", "").await.unwrap_err();
        assert!(matches!(err, RegistryError::AlreadyExists));
    }

    #[tokio::test]
    async fn test_delete_rejects_nonempty_namespace() {
        let (ns_store, registry) = setup();
        ns_store.create("prod", "").await.unwrap();
        registry
            .register(crate::model::ServiceInstance {
                instance_id: String::new(),
                name: "api".to_string(),
                namespace: "prod".to_string(),
                ip: "10.0.0.1".to_string(),
                port: 80,
                tags: vec![],
                metadata: HashMap::new(),
                ttl_seconds: 30,
                health: Default::default(),
                registered_at: Utc::now(),
                last_heartbeat: Utc::now(),
                load_balance_policy: Default::default(),
                weight: 0,
                lease_id: None,
            })
            .await
            .unwrap();

        let err = ns_store.delete("prod").await.unwrap_err();
        assert!(matches!(err, RegistryError::NamespaceNotEmpty));
    }
}
