//! Watch-driven in-memory mirror of registered service instances, keyed for
//! O(1) lookup by `(namespace, name)` on the DNS hot path.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::model::ServiceInstance;
use crate::store::{EventKind, WatchEvent};

#[derive(Default)]
pub struct InstanceCache {
    by_id: RwLock<HashMap<String, ServiceInstance>>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all(&self, instances: Vec<ServiceInstance>) {
        let mut map = HashMap::with_capacity(instances.len());
        for instance in instances {
            map.insert(instance.instance_id.clone(), instance);
        }
        *self.by_id.write() = map;
    }

    /// Applies one store watch event. `key` is the raw store key
    /// (`/services/<id>`); events for keys outside that prefix are ignored by
    /// the caller before this is reached.
    pub fn apply_event(&self, instance_id: &str, event: &WatchEvent) {
        match event.kind {
            EventKind::Delete => {
                self.by_id.write().remove(instance_id);
            }
            EventKind::PutCreate | EventKind::PutUpdate => {
                if let Ok(instance) = serde_json::from_slice::<ServiceInstance>(&event.kv.value) {
                    self.by_id.write().insert(instance_id.to_string(), instance);
                }
            }
        }
    }

    pub fn list_by_name(&self, namespace: &str, name: &str) -> Vec<ServiceInstance> {
        self.by_id
            .read()
            .values()
            .filter(|i| i.namespace == namespace && i.name == name)
            .cloned()
            .collect()
    }

    pub fn list_healthy_by_name(&self, namespace: &str, name: &str) -> Vec<ServiceInstance> {
        self.list_by_name(namespace, name)
            .into_iter()
            .filter(|i| i.is_healthy())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.by_id.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
