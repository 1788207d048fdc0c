//! Custom DNS record and service/DNS association CRUD. Unlike service
//! instances, these persist until explicitly deleted; they carry no lease.

use std::sync::Arc;

use super::{RegistryError, Result};
use crate::model::{CustomRecord, RecordType, ServiceDnsAssociation};
use crate::store::StoreClient;

const RECORDS_PREFIX: &str = "/dns/records/";
const ASSOCIATIONS_PREFIX: &str = "/associations/";

fn record_key(domain: &str, record_type: RecordType) -> String {
    format!("{RECORDS_PREFIX}{domain}/{}", record_type.as_str())
}

fn association_key(domain: &str, record_type: RecordType) -> String {
    format!("{ASSOCIATIONS_PREFIX}{domain}/{}", record_type.as_str())
}

pub struct RecordStore {
    store: Arc<dyn StoreClient>,
}

impl RecordStore {
    pub fn new(store: Arc<dyn StoreClient>) -> Self {
        RecordStore { store }
    }

    pub async fn upsert_record(&self, record: CustomRecord) -> Result<CustomRecord> {
        if record.ttl_seconds == 0 {
            return Err(RegistryError::InvalidArgument("ttl must be at least 1 second".into()));
        }
        let key = record_key(&record.domain, record.record_type);
        self.store.put(&key, serde_json::to_vec(&record)?).await?;
        Ok(record)
    }

    pub async fn get_record(&self, domain: &str, record_type: RecordType) -> Result<CustomRecord> {
        let kv = self
            .store
            .get(&record_key(domain, record_type))
            .await?
            .ok_or(RegistryError::NotFound)?;
        Ok(serde_json::from_slice(&kv.value)?)
    }

    pub async fn delete_record(&self, domain: &str, record_type: RecordType) -> Result<()> {
        self.store.delete(&record_key(domain, record_type)).await?;
        Ok(())
    }

    pub async fn list_records_for_domain(&self, domain: &str) -> Result<Vec<CustomRecord>> {
        let prefix = format!("{RECORDS_PREFIX}{domain}/");
        let kvs = self.store.get_prefix(&prefix).await?;
        Ok(kvs
            .iter()
            .filter_map(|kv| serde_json::from_slice(&kv.value).ok())
            .collect())
    }

    pub async fn upsert_association(&self, assoc: ServiceDnsAssociation) -> Result<ServiceDnsAssociation> {
        let key = association_key(&assoc.domain, assoc.record_type);
        self.store.put(&key, serde_json::to_vec(&assoc)?).await?;
        Ok(assoc)
    }

    pub async fn get_association(
        &self,
        domain: &str,
        record_type: RecordType,
    ) -> Result<Option<ServiceDnsAssociation>> {
        let kv = self.store.get(&association_key(domain, record_type)).await?;
        match kv {
            Some(kv) => Ok(Some(serde_json::from_slice(&kv.value)?)),
            None => Ok(None),
        }
    }

    pub async fn delete_association(&self, domain: &str, record_type: RecordType) -> Result<()> {
        self.store.delete(&association_key(domain, record_type)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::InMemoryStoreClient;

    fn store() -> RecordStore {
        RecordStore::new(Arc::new(InMemoryStoreClient::new()))
    }

    #[tokio::test]
    async fn test_upsert_and_get_record() {
        let records = store();
        records
            .upsert_record(CustomRecord {
                domain: "api.internal.".to_string(),
                record_type: RecordType::Txt,
                value: "v=1".to_string(),
                ttl_seconds: 300,
                tags: vec![],
            })
            .await
            .unwrap();

        let fetched = records
            .get_record("api.internal.", RecordType::Txt)
            .await
            .unwrap();
        assert_eq!(fetched.value, "v=1");
    }

    #[tokio::test]
    async fn test_rejects_zero_ttl() {
        let records = store();
        let err = records
            .upsert_record(CustomRecord {
                domain: "api.internal.".to_string(),
                record_type: RecordType::Txt,
                value: "v=1".to_string(),
                ttl_seconds: 0,
                tags: vec![],
            })
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_association_roundtrip() {
        let records = store();
        records
            .upsert_association(ServiceDnsAssociation {
                domain: "api.example.com.".to_string(),
                record_type: RecordType::A,
                service_name: "api".to_string(),
                namespace: "default".to_string(),
            })
            .await
            .unwrap();

        let found = records
            .get_association("api.example.com.", RecordType::A)
            .await
            .unwrap();
        assert!(found.is_some());
        assert_eq!(found.unwrap().service_name, "api");
    }
}
