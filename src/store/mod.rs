//! Typed wrapper over a strongly-consistent key-value store offering leases
//! and watch streams. The rest of the crate is written against [`StoreClient`]
//! as a trait object; [`etcd`] and [`memory`] are the two backends that ship
//! with this core.

pub mod etcd;
pub mod memory;

use async_trait::async_trait;
use derive_more::{Display, Error, From};
use futures_util::stream::BoxStream;

#[derive(Debug, Display, From, Error)]
pub enum StoreError {
    #[display(fmt = "store request timed out")]
    Timeout,
    #[display(fmt = "store unavailable: {}", _0)]
    Unavailable(#[error(not(source))] String),
    #[display(fmt = "lease {} not found", _0)]
    LeaseNotFound(#[error(not(source))] i64),
    #[display(fmt = "watch interrupted: {}", _0)]
    WatchInterrupted(#[error(not(source))] String),
    Transport(reqwest::Error),
    Encoding(serde_json::Error),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub value: Vec<u8>,
    /// Monotonically increasing store revision the value was written at.
    pub revision: i64,
    pub lease: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    PutCreate,
    PutUpdate,
    Delete,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: EventKind,
    pub kv: KeyValue,
    pub prev_value: Option<Vec<u8>>,
}

pub type WatchStream = BoxStream<'static, Result<WatchEvent>>;

/// Backend-agnostic contract the Registry, caches and lease manager are
/// written against. Implementations must preserve per-key commit ordering in
/// their watch stream.
#[async_trait]
pub trait StoreClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>>;
    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>>;
    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()>;
    async fn put_with_lease(&self, key: &str, value: Vec<u8>, lease: i64) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<()>;
    async fn delete_prefix(&self, prefix: &str) -> Result<u64>;

    /// Begins watching `prefix` from the current revision. The returned
    /// stream is logically infinite; callers cancel by dropping it.
    async fn watch(&self, prefix: &str) -> Result<WatchStream>;

    async fn grant_lease(&self, ttl_seconds: i64) -> Result<i64>;
    async fn revoke_lease(&self, lease: i64) -> Result<()>;
    async fn keep_alive(&self, lease: i64) -> Result<()>;
}
