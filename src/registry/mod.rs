//! Service-instance and custom-record persistence against the store, plus
//! the name indices that make "list instances by name" an O(1) prefix scan
//! instead of a full collection scan.

pub mod namespace;
pub mod records;

use std::sync::Arc;

use chrono::Utc;
use derive_more::{Display, Error, From};

use crate::lease::LeaseManager;
use crate::model::{Health, ServiceInstance};
use crate::store::{StoreClient, StoreError};

#[derive(Debug, Display, From, Error)]
pub enum RegistryError {
    #[display(fmt = "not found")]
    NotFound,
    #[display(fmt = "already exists")]
    AlreadyExists,
    #[display(fmt = "invalid argument: {}", _0)]
    InvalidArgument(#[error(not(source))] String),
    #[display(fmt = "namespace is not empty")]
    NamespaceNotEmpty,
    Store(StoreError),
    Encoding(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, RegistryError>;

const SERVICES_PREFIX: &str = "/services/";
const SERVICE_NAMES_PREFIX: &str = "/service-names/";

fn service_key(instance_id: &str) -> String {
    format!("{SERVICES_PREFIX}{instance_id}")
}

fn name_index_key(namespace: &str, name: &str) -> String {
    format!("{SERVICE_NAMES_PREFIX}{namespace}/{name}")
}

pub struct Registry {
    store: Arc<dyn StoreClient>,
    leases: LeaseManager,
}

impl Registry {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        Registry {
            leases: LeaseManager::new(store.clone()),
            store,
        }
    }

    fn validate(instance: &ServiceInstance) -> Result<()> {
        if instance.name.trim().is_empty() {
            return Err(RegistryError::InvalidArgument("name must not be empty".into()));
        }
        if instance.ip.trim().is_empty() || instance.ip.parse::<std::net::IpAddr>().is_err() {
            return Err(RegistryError::InvalidArgument(format!(
                "invalid ip address: {}",
                instance.ip
            )));
        }
        if instance.port == 0 {
            return Err(RegistryError::InvalidArgument("port must be nonzero".into()));
        }
        Ok(())
    }

    /// Registers a new instance, or refreshes an existing one under the same
    /// `instance_id`, granting a fresh lease either way.
    pub async fn register(&self, mut instance: ServiceInstance) -> Result<ServiceInstance> {
        if instance.namespace.trim().is_empty() {
            instance.namespace = "default".to_string();
        }
        if instance.instance_id.trim().is_empty() {
            instance.instance_id = ServiceInstance::new_id();
        }
        Self::validate(&instance)?;

        let now = Utc::now();
        instance.registered_at = now;
        instance.last_heartbeat = now;
        instance.health = Health::Healthy;

        let lease = self.leases.grant(instance.ttl_seconds).await?;
        instance.lease_id = lease;
        let value = serde_json::to_vec(&instance)?;

        match lease {
            Some(lease_id) => {
                self.store
                    .put_with_lease(&service_key(&instance.instance_id), value, lease_id)
                    .await?
            }
            None => self.store.put(&service_key(&instance.instance_id), value).await?,
        }

        self.add_to_name_index(&instance.namespace, &instance.name, &instance.instance_id)
            .await?;

        Ok(instance)
    }

    pub async fn deregister(&self, instance_id: &str) -> Result<()> {
        let instance = self.get_instance(instance_id).await?;
        self.store.delete(&service_key(instance_id)).await?;
        self.remove_from_name_index(&instance.namespace, &instance.name, instance_id)
            .await?;
        if let Some(lease_id) = instance.lease_id {
            if let Err(e) = self.leases.revoke(lease_id).await {
                tracing::warn!(instance_id, error = %e, "failed to revoke lease on deregister");
            }
        }
        Ok(())
    }

    pub async fn update_heartbeat(
        &self,
        instance_id: &str,
        new_ttl: Option<u64>,
    ) -> Result<ServiceInstance> {
        let mut instance = self.get_instance(instance_id).await?;
        instance.last_heartbeat = Utc::now();
        instance.health = Health::Healthy;
        if let Some(ttl) = new_ttl {
            instance.ttl_seconds = ttl;
        }

        let lease = self.leases.grant(instance.ttl_seconds).await?;
        instance.lease_id = lease;
        let value = serde_json::to_vec(&instance)?;
        match lease {
            Some(lease_id) => {
                self.store
                    .put_with_lease(&service_key(instance_id), value, lease_id)
                    .await?
            }
            None => self.store.put(&service_key(instance_id), value).await?,
        }

        Ok(instance)
    }

    pub async fn get_instance(&self, instance_id: &str) -> Result<ServiceInstance> {
        let kv = self
            .store
            .get(&service_key(instance_id))
            .await?
            .ok_or(RegistryError::NotFound)?;
        Ok(serde_json::from_slice(&kv.value)?)
    }

    pub async fn list_by_name(&self, namespace: &str, name: &str) -> Result<Vec<ServiceInstance>> {
        let kv = self.store.get(&name_index_key(namespace, name)).await?;
        let ids: Vec<String> = match kv {
            Some(kv) => serde_json::from_slice(&kv.value)?,
            None => return Ok(Vec::new()),
        };

        let mut instances = Vec::with_capacity(ids.len());
        for id in ids {
            if let Ok(instance) = self.get_instance(&id).await {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    pub async fn list_by_namespace(&self, namespace: &str) -> Result<Vec<ServiceInstance>> {
        let all = self.list_all().await?;
        Ok(all.into_iter().filter(|i| i.namespace == namespace).collect())
    }

    pub async fn list_all(&self) -> Result<Vec<ServiceInstance>> {
        let kvs = self.store.get_prefix(SERVICES_PREFIX).await?;
        let mut instances = Vec::with_capacity(kvs.len());
        for kv in kvs {
            if let Ok(instance) = serde_json::from_slice::<ServiceInstance>(&kv.value) {
                instances.push(instance);
            }
        }
        Ok(instances)
    }

    /// Scans every instance and deregisters those whose last heartbeat is
    /// older than `cutoff`. Returns the number removed.
    pub async fn cleanup_stale(&self, cutoff: chrono::DateTime<Utc>) -> Result<u64> {
        let all = self.list_all().await?;
        let mut removed = 0;
        for instance in all {
            if instance.last_heartbeat < cutoff {
                if self.deregister(&instance.instance_id).await.is_ok() {
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    async fn add_to_name_index(&self, namespace: &str, name: &str, instance_id: &str) -> Result<()> {
        let key = name_index_key(namespace, name);
        let mut ids: Vec<String> = match self.store.get(&key).await? {
            Some(kv) => serde_json::from_slice(&kv.value)?,
            None => Vec::new(),
        };
        if !ids.iter().any(|id| id == instance_id) {
            ids.push(instance_id.to_string());
        }
        self.store.put(&key, serde_json::to_vec(&ids)?).await?;
        Ok(())
    }

    async fn remove_from_name_index(&self, namespace: &str, name: &str, instance_id: &str) -> Result<()> {
        let key = name_index_key(namespace, name);
        let Some(kv) = self.store.get(&key).await? else {
            return Ok(());
        };
        let mut ids: Vec<String> = serde_json::from_slice(&kv.value)?;
        ids.retain(|id| id != instance_id);
        if ids.is_empty() {
            self.store.delete(&key).await?;
        } else {
            self.store.put(&key, serde_json::to_vec(&ids)?).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStoreClient;
    use std::collections::HashMap;

    fn test_instance(name: &str, ns: &str, port: u16) -> ServiceInstance {
        ServiceInstance {
            instance_id: String::new(),
            name: name.to_string(),
            namespace: ns.to_string(),
            ip: "10.0.0.5".to_string(),
            port,
            tags: vec![],
            metadata: HashMap::new(),
            ttl_seconds: 30,
            health: Health::Unknown,
            registered_at: Utc::now(),
            last_heartbeat: Utc::now(),
            load_balance_policy: Default::default(),
            weight: 0,
            lease_id: None,
        }
    }

    fn registry() -> Registry {
        Registry::new(Arc::new(InMemoryStoreClient::new()))
    }

    #[tokio::test]
    async fn test_register_roundtrip() {
        let reg = registry();
        let registered = reg.register(test_instance("api", "default", 8080)).await.unwrap();
        let fetched = reg.get_instance(&registered.instance_id).await.unwrap();
        assert_eq!(fetched.ip, "10.0.0.5");
        assert_eq!(fetched.health, Health::Healthy);
    }

    #[tokio::test]
    async fn test_register_stamps_lease_id() {
        let reg = registry();
        let registered = reg.register(test_instance("api", "default", 8080)).await.unwrap();
        assert!(registered.lease_id.is_some());
    }

    #[tokio::test]
    async fn test_deregister_revokes_lease() {
        let store = Arc::new(InMemoryStoreClient::new());
        let reg = Registry::new(store.clone());
        let instance = reg.register(test_instance("api", "default", 8080)).await.unwrap();
        let lease_id = instance.lease_id.unwrap();

        reg.deregister(&instance.instance_id).await.unwrap();

        // The lease is gone, not merely the key it backed.
        assert!(matches!(
            store.keep_alive(lease_id).await,
            Err(StoreError::LeaseNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_register_defaults_namespace() {
        let reg = registry();
        let instance = reg.register(test_instance("api", "", 8080)).await.unwrap();
        assert_eq!(instance.namespace, "default");
    }

    #[tokio::test]
    async fn test_register_rejects_bad_ip() {
        let reg = registry();
        let mut bad = test_instance("api", "default", 8080);
        bad.ip = "not-an-ip".to_string();
        let err = reg.register(bad).await.unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_deregister_removes_from_name_index() {
        let reg = registry();
        let instance = reg.register(test_instance("api", "default", 8080)).await.unwrap();
        reg.deregister(&instance.instance_id).await.unwrap();

        assert!(reg.get_instance(&instance.instance_id).await.is_err());
        assert!(reg.list_by_name("default", "api").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_list_by_name_multiple_instances() {
        let reg = registry();
        reg.register(test_instance("api", "default", 8080)).await.unwrap();
        reg.register(test_instance("api", "default", 8081)).await.unwrap();
        reg.register(test_instance("other", "default", 9090)).await.unwrap();

        let found = reg.list_by_name("default", "api").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_namespace_isolation() {
        let reg = registry();
        reg.register(test_instance("api", "default", 8080)).await.unwrap();
        reg.register(test_instance("api", "prod", 9090)).await.unwrap();

        assert_eq!(reg.list_by_name("default", "api").await.unwrap().len(), 1);
        assert_eq!(reg.list_by_name("prod", "api").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_heartbeat_updates_timestamp_and_preserves_identity() {
        let reg = registry();
        let instance = reg.register(test_instance("api", "default", 8080)).await.unwrap();
        let first_heartbeat = instance.last_heartbeat;

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let updated = reg.update_heartbeat(&instance.instance_id, None).await.unwrap();

        assert!(updated.last_heartbeat >= first_heartbeat);
        assert_eq!(updated.instance_id, instance.instance_id);
        assert_eq!(updated.ip, instance.ip);
    }

    #[tokio::test]
    async fn test_cleanup_stale_removes_old_instances() {
        let reg = registry();
        let instance = reg.register(test_instance("api", "default", 8080)).await.unwrap();

        let cutoff = Utc::now() + chrono::Duration::seconds(1);
        let removed = reg.cleanup_stale(cutoff).await.unwrap();

        assert_eq!(removed, 1);
        assert!(reg.get_instance(&instance.instance_id).await.is_err());
    }
}
