//! Watch-driven in-memory mirrors of custom DNS records and service/DNS
//! associations.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::model::{CustomRecord, RecordType, ServiceDnsAssociation};
use crate::store::{EventKind, WatchEvent};

fn parse_type(s: &str) -> Option<RecordType> {
    match s {
        "A" => Some(RecordType::A),
        "AAAA" => Some(RecordType::Aaaa),
        "CNAME" => Some(RecordType::Cname),
        "MX" => Some(RecordType::Mx),
        "TXT" => Some(RecordType::Txt),
        "SRV" => Some(RecordType::Srv),
        _ => None,
    }
}

#[derive(Default)]
pub struct RecordCache {
    records: RwLock<HashMap<(String, String), CustomRecord>>,
    associations: RwLock<HashMap<(String, String), ServiceDnsAssociation>>,
}

impl RecordCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn replace_all_records(&self, records: Vec<CustomRecord>) {
        let mut map = HashMap::with_capacity(records.len());
        for r in records {
            map.insert((r.domain.clone(), r.record_type.as_str().to_string()), r);
        }
        *self.records.write() = map;
    }

    pub fn replace_all_associations(&self, assocs: Vec<ServiceDnsAssociation>) {
        let mut map = HashMap::with_capacity(assocs.len());
        for a in assocs {
            map.insert((a.domain.clone(), a.record_type.as_str().to_string()), a);
        }
        *self.associations.write() = map;
    }

    /// `key` is the raw store key, e.g. `/dns/records/<domain>/<TYPE>`.
    pub fn apply_record_event(&self, key: &str, event: &WatchEvent) {
        let Some((domain, rtype)) = split_domain_type("/dns/records/", key) else {
            return;
        };
        match event.kind {
            EventKind::Delete => {
                self.records.write().remove(&(domain, rtype));
            }
            EventKind::PutCreate | EventKind::PutUpdate => {
                if let Ok(record) = serde_json::from_slice::<CustomRecord>(&event.kv.value) {
                    self.records.write().insert((domain, rtype), record);
                }
            }
        }
    }

    pub fn apply_association_event(&self, key: &str, event: &WatchEvent) {
        let Some((domain, rtype)) = split_domain_type("/associations/", key) else {
            return;
        };
        match event.kind {
            EventKind::Delete => {
                self.associations.write().remove(&(domain, rtype));
            }
            EventKind::PutCreate | EventKind::PutUpdate => {
                if let Ok(assoc) = serde_json::from_slice::<ServiceDnsAssociation>(&event.kv.value) {
                    self.associations.write().insert((domain, rtype), assoc);
                }
            }
        }
    }

    pub fn get_record(&self, domain: &str, record_type: RecordType) -> Option<CustomRecord> {
        self.records
            .read()
            .get(&(domain.to_string(), record_type.as_str().to_string()))
            .cloned()
    }

    pub fn get_association(&self, domain: &str, record_type: RecordType) -> Option<ServiceDnsAssociation> {
        self.associations
            .read()
            .get(&(domain.to_string(), record_type.as_str().to_string()))
            .cloned()
    }
}

fn split_domain_type(prefix: &str, key: &str) -> Option<(String, String)> {
    let rest = key.strip_prefix(prefix)?;
    let (domain, rtype) = rest.rsplit_once('/')?;
    parse_type(rtype)?;
    Some((domain.to_string(), rtype.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::KeyValue;

    #[test]
    fn test_apply_record_event_put_and_delete() {
        let cache = RecordCache::new();
        let record = CustomRecord {
            domain: "api.internal.".to_string(),
            record_type: RecordType::Txt,
            value: "v=1".to_string(),
            ttl_seconds: 60,
            tags: vec![],
        };
        let key = "/dns/records/api.internal./TXT".to_string();
        let event = WatchEvent {
            kind: EventKind::PutCreate,
            kv: KeyValue {
                key: key.clone(),
                value: serde_json::to_vec(&record).unwrap(),
                revision: 1,
                lease: None,
            },
            prev_value: None,
        };
        cache.apply_record_event(&key, &event);
        assert!(cache.get_record("api.internal.", RecordType::Txt).is_some());

        let delete_event = WatchEvent {
            kind: EventKind::Delete,
            kv: KeyValue {
                key: key.clone(),
                value: vec![],
                revision: 2,
                lease: None,
            },
            prev_value: None,
        };
        cache.apply_record_event(&key, &delete_event);
        assert!(cache.get_record("api.internal.", RecordType::Txt).is_none());
    }
}
