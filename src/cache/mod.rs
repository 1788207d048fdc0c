//! Watch-driven caches. Each cache owns its own watch task; the DNS server
//! and record assembler only ever read through the cache, never the store.

pub mod instance_cache;
pub mod record_cache;
pub(crate) mod watch_task;

use std::sync::Arc;

use instance_cache::InstanceCache;
use record_cache::RecordCache;

use crate::model::{CustomRecord, ServiceDnsAssociation, ServiceInstance};
use crate::shutdown::Shutdown;
use crate::store::StoreClient;

const SERVICES_PREFIX: &str = "/services/";
const RECORDS_PREFIX: &str = "/dns/records/";
const ASSOCIATIONS_PREFIX: &str = "/associations/";

/// Owns the instance and custom-record caches and the background tasks that
/// keep them fresh.
pub struct Caches {
    pub instances: Arc<InstanceCache>,
    pub records: Arc<RecordCache>,
}

impl Caches {
    pub fn new() -> Self {
        Caches {
            instances: Arc::new(InstanceCache::new()),
            records: Arc::new(RecordCache::new()),
        }
    }

    /// Spawns the three watch loops (instances, custom records, associations)
    /// as background tasks. Returns once all three have been started; they
    /// keep running until `shutdown` fires.
    pub fn spawn_watches(&self, store: Arc<dyn StoreClient>, shutdown: Shutdown) {
        let instances = self.instances.clone();
        let store_for_instances = store.clone();
        let shutdown_for_instances = shutdown.clone();
        tokio::spawn(async move {
            watch_task::run(
                store_for_instances,
                SERVICES_PREFIX,
                shutdown_for_instances,
                {
                    let instances = instances.clone();
                    move |kvs| {
                        let parsed: Vec<ServiceInstance> = kvs
                            .iter()
                            .filter_map(|kv| serde_json::from_slice(&kv.value).ok())
                            .collect();
                        instances.replace_all(parsed);
                    }
                },
                {
                    let instances = instances.clone();
                    move |event| {
                        if let Some(id) = event.kv.key.strip_prefix(SERVICES_PREFIX) {
                            instances.apply_event(id, event);
                        }
                    }
                },
            )
            .await;
        });

        let records = self.records.clone();
        let store_for_records = store.clone();
        let shutdown_for_records = shutdown.clone();
        tokio::spawn(async move {
            watch_task::run(
                store_for_records,
                RECORDS_PREFIX,
                shutdown_for_records,
                {
                    let records = records.clone();
                    move |kvs| {
                        let parsed: Vec<CustomRecord> = kvs
                            .iter()
                            .filter_map(|kv| serde_json::from_slice(&kv.value).ok())
                            .collect();
                        records.replace_all_records(parsed);
                    }
                },
                {
                    let records = records.clone();
                    move |event| records.apply_record_event(&event.kv.key, event)
                },
            )
            .await;
        });

        let associations = self.records.clone();
        let shutdown_for_assoc = shutdown;
        tokio::spawn(async move {
            watch_task::run(
                store,
                ASSOCIATIONS_PREFIX,
                shutdown_for_assoc,
                {
                    let associations = associations.clone();
                    move |kvs| {
                        let parsed: Vec<ServiceDnsAssociation> = kvs
                            .iter()
                            .filter_map(|kv| serde_json::from_slice(&kv.value).ok())
                            .collect();
                        associations.replace_all_associations(parsed);
                    }
                },
                {
                    let associations = associations.clone();
                    move |event| associations.apply_association_event(&event.kv.key, event)
                },
            )
            .await;
        });
    }
}

impl Default for Caches {
    fn default() -> Self {
        Self::new()
    }
}
