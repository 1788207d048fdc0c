//! In-memory store backend used for tests and local development. Satisfies
//! the same [`StoreClient`] contract as the etcd backend, including lease
//! expiry and watch delivery, modulo the network failures a real backend can
//! produce.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::broadcast;

use super::{EventKind, KeyValue, Result, StoreClient, StoreError, WatchEvent, WatchStream};

struct Entry {
    value: Vec<u8>,
    revision: i64,
    lease: Option<i64>,
}

struct Lease {
    expires_at: Instant,
}

struct Inner {
    entries: BTreeMap<String, Entry>,
    leases: BTreeMap<i64, Lease>,
    next_revision: i64,
}

/// A `BTreeMap`-backed store guarded by a single lock. Lease expiry runs on a
/// background sweep; watch events are fanned out over a broadcast channel.
pub struct InMemoryStoreClient {
    inner: Arc<Mutex<Inner>>,
    lease_seq: Arc<AtomicI64>,
    events: broadcast::Sender<WatchEvent>,
}

impl Default for InMemoryStoreClient {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStoreClient {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(1024);
        let client = InMemoryStoreClient {
            inner: Arc::new(Mutex::new(Inner {
                entries: BTreeMap::new(),
                leases: BTreeMap::new(),
                next_revision: 1,
            })),
            lease_seq: Arc::new(AtomicI64::new(1)),
            events: tx,
        };
        client.spawn_lease_sweeper();
        client
    }

    fn spawn_lease_sweeper(&self) {
        let inner = self.inner.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let expired_keys: Vec<(String, i64)> = {
                    let mut guard = inner.lock();
                    let now = Instant::now();
                    let expired_leases: Vec<i64> = guard
                        .leases
                        .iter()
                        .filter(|(_, l)| l.expires_at <= now)
                        .map(|(id, _)| *id)
                        .collect();
                    for id in &expired_leases {
                        guard.leases.remove(id);
                    }
                    guard
                        .entries
                        .iter()
                        .filter(|(_, e)| e.lease.map(|l| expired_leases.contains(&l)).unwrap_or(false))
                        .map(|(k, e)| (k.clone(), e.revision))
                        .collect()
                };

                if expired_keys.is_empty() {
                    continue;
                }

                let mut guard = inner.lock();
                for (key, _) in &expired_keys {
                    guard.entries.remove(key);
                }
                drop(guard);

                for (key, revision) in expired_keys {
                    let _ = events.send(WatchEvent {
                        kind: EventKind::Delete,
                        kv: KeyValue {
                            key,
                            value: Vec::new(),
                            revision,
                            lease: None,
                        },
                        prev_value: None,
                    });
                }
            }
        });
    }
}

#[async_trait]
impl StoreClient for InMemoryStoreClient {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let guard = self.inner.lock();
        Ok(guard.entries.get(key).map(|e| KeyValue {
            key: key.to_string(),
            value: e.value.clone(),
            revision: e.revision,
            lease: e.lease,
        }))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let guard = self.inner.lock();
        Ok(guard
            .entries
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, e)| KeyValue {
                key: k.clone(),
                value: e.value.clone(),
                revision: e.revision,
                lease: e.lease,
            })
            .collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.put_inner(key, value, None)
    }

    async fn put_with_lease(&self, key: &str, value: Vec<u8>, lease: i64) -> Result<()> {
        {
            let guard = self.inner.lock();
            if !guard.leases.contains_key(&lease) {
                return Err(StoreError::LeaseNotFound(lease));
            }
        }
        self.put_inner(key, value, Some(lease))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let existed = {
            let mut guard = self.inner.lock();
            let rev = guard.next_revision;
            guard.next_revision += 1;
            guard.entries.remove(key).map(|_| rev)
        };

        if let Some(revision) = existed {
            let _ = self.events.send(WatchEvent {
                kind: EventKind::Delete,
                kv: KeyValue {
                    key: key.to_string(),
                    value: Vec::new(),
                    revision,
                    lease: None,
                },
                prev_value: None,
            });
        }

        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let keys: Vec<String> = {
            let guard = self.inner.lock();
            guard
                .entries
                .range(prefix.to_string()..)
                .take_while(|(k, _)| k.starts_with(prefix))
                .map(|(k, _)| k.clone())
                .collect()
        };

        for key in &keys {
            self.delete(key).await?;
        }

        Ok(keys.len() as u64)
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let mut rx = self.events.subscribe();
        let prefix = prefix.to_string();
        let stream = async_stream::stream! {
            loop {
                match rx.recv().await {
                    Ok(ev) if ev.kv.key.starts_with(&prefix) => yield Ok(ev),
                    Ok(_) => continue,
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        yield Err(StoreError::WatchInterrupted(
                            "watch lagged behind and dropped events".into(),
                        ));
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn grant_lease(&self, ttl_seconds: i64) -> Result<i64> {
        let id = self.lease_seq.fetch_add(1, Ordering::SeqCst);
        let mut guard = self.inner.lock();
        guard.leases.insert(
            id,
            Lease {
                expires_at: Instant::now() + Duration::from_secs(ttl_seconds.max(0) as u64),
            },
        );
        Ok(id)
    }

    async fn revoke_lease(&self, lease: i64) -> Result<()> {
        let keys: Vec<String> = {
            let mut guard = self.inner.lock();
            guard.leases.remove(&lease);
            guard
                .entries
                .iter()
                .filter(|(_, e)| e.lease == Some(lease))
                .map(|(k, _)| k.clone())
                .collect()
        };
        for key in keys {
            self.delete(&key).await?;
        }
        Ok(())
    }

    async fn keep_alive(&self, lease: i64) -> Result<()> {
        let mut guard = self.inner.lock();
        match guard.leases.get_mut(&lease) {
            Some(l) => {
                // Renew to the TTL it was granted with is not tracked separately
                // in this minimal backend; keep_alive pushes expiry forward by
                // a fixed grace window matching the sweep's poll interval.
                l.expires_at = Instant::now() + Duration::from_secs(30);
                Ok(())
            }
            None => Err(StoreError::LeaseNotFound(lease)),
        }
    }
}

impl InMemoryStoreClient {
    fn put_inner(&self, key: &str, value: Vec<u8>, lease: Option<i64>) -> Result<()> {
        let (revision, created) = {
            let mut guard = self.inner.lock();
            let rev = guard.next_revision;
            guard.next_revision += 1;
            let created = !guard.entries.contains_key(key);
            guard.entries.insert(
                key.to_string(),
                Entry {
                    value: value.clone(),
                    revision: rev,
                    lease,
                },
            );
            (rev, created)
        };

        let _ = self.events.send(WatchEvent {
            kind: if created {
                EventKind::PutCreate
            } else {
                EventKind::PutUpdate
            },
            kv: KeyValue {
                key: key.to_string(),
                value,
                revision,
                lease,
            },
            prev_value: None,
        });

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_delete_roundtrip() {
        let store = InMemoryStoreClient::new();
        store.put("/services/a", b"one".to_vec()).await.unwrap();
        let kv = store.get("/services/a").await.unwrap().unwrap();
        assert_eq!(kv.value, b"one");

        store.delete("/services/a").await.unwrap();
        assert!(store.get("/services/a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prefix_scan() {
        let store = InMemoryStoreClient::new();
        store.put("/services/a", b"1".to_vec()).await.unwrap();
        store.put("/services/b", b"2".to_vec()).await.unwrap();
        store.put("/namespaces/default", b"3".to_vec()).await.unwrap();

        let found = store.get_prefix("/services/").await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_lease_put_requires_existing_lease() {
        let store = InMemoryStoreClient::new();
        let err = store
            .put_with_lease("/services/a", b"x".to_vec(), 999)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::LeaseNotFound(999)));
    }

    #[tokio::test]
    async fn test_lease_expiry_removes_key() {
        let store = InMemoryStoreClient::new();
        let lease = store.grant_lease(0).await.unwrap();
        store
            .put_with_lease("/services/a", b"x".to_vec(), lease)
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.get("/services/a").await.unwrap().is_none());
    }
}
