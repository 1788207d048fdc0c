//! Shared domain types persisted by the registry and consumed by the cache
//! and record assembler.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_derive::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Health {
    Healthy,
    Unhealthy,
    Unknown,
}

impl Default for Health {
    fn default() -> Self {
        Health::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum LoadBalancePolicy {
    RoundRobin,
    Random,
    Weighted,
    FirstOnly,
}

impl Default for LoadBalancePolicy {
    fn default() -> Self {
        LoadBalancePolicy::RoundRobin
    }
}

/// A single live endpoint of a named service.
///
/// `load_balance_policy` and `weight` are carried as client-visible metadata;
/// the record assembler never reads them when composing DNS answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceInstance {
    pub instance_id: String,
    pub name: String,
    pub namespace: String,
    pub ip: String,
    pub port: u16,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub ttl_seconds: u64,
    #[serde(default)]
    pub health: Health,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    #[serde(default)]
    pub load_balance_policy: LoadBalancePolicy,
    #[serde(default)]
    pub weight: u16,
    /// Store lease backing this instance's current write, if any. Stamped by
    /// the registry on register/heartbeat; used to revoke the lease on
    /// deregister rather than waiting for it to expire on its own.
    #[serde(default)]
    pub lease_id: Option<i64>,
}

impl ServiceInstance {
    pub fn new_id() -> String {
        Uuid::new_v4().to_string()
    }

    pub fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Namespace {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RecordType {
    A,
    Aaaa,
    Cname,
    Mx,
    Txt,
    Srv,
}

impl RecordType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordType::A => "A",
            RecordType::Aaaa => "AAAA",
            RecordType::Cname => "CNAME",
            RecordType::Mx => "MX",
            RecordType::Txt => "TXT",
            RecordType::Srv => "SRV",
        }
    }
}

/// A manually administered authoritative record, keyed by `(domain, record_type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomRecord {
    pub domain: String,
    pub record_type: RecordType,
    pub value: String,
    pub ttl_seconds: u32,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Redirects lookups of a custom domain/type to synthesize records from a
/// service's live instances rather than returning a literal stored value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDnsAssociation {
    pub domain: String,
    pub record_type: RecordType,
    pub service_name: String,
    pub namespace: String,
}
