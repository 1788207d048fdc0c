//! etcd v3 backend talking to etcd's JSON/gRPC-gateway HTTP surface.
//!
//! No code generation or gRPC client is needed: etcd exposes every KV/lease
//! RPC as a JSON POST under `/v3/...`, which composes directly with the
//! `reqwest` client already used elsewhere in this crate. Keys and values on
//! the wire are base64, per the gateway's encoding of proto `bytes` fields.

use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::{json, Value};

use super::{EventKind, KeyValue, Result, StoreClient, StoreError, WatchEvent, WatchStream};

pub struct EtcdClient {
    base_url: String,
    http: reqwest::Client,
}

impl EtcdClient {
    pub fn new(base_url: impl Into<String>, request_timeout: Duration) -> Self {
        EtcdClient {
            base_url: base_url.into(),
            http: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .expect("reqwest client"),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn post(&self, path: &str, body: Value) -> Result<Value> {
        let resp = self
            .http
            .post(self.url(path))
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Timeout
                } else {
                    StoreError::Unavailable(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "etcd returned {}",
                resp.status()
            )));
        }

        resp.json::<Value>().await.map_err(StoreError::Transport)
    }

    fn kv_from_json(v: &Value) -> Option<KeyValue> {
        let key = base64::decode(v.get("key")?.as_str()?).ok()?;
        let value = v
            .get("value")
            .and_then(|v| v.as_str())
            .map(|s| base64::decode(s).unwrap_or_default())
            .unwrap_or_default();
        let revision = v
            .get("mod_revision")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        let lease = v
            .get("lease")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .filter(|l| *l != 0);

        Some(KeyValue {
            key: String::from_utf8_lossy(&key).into_owned(),
            value,
            revision,
            lease,
        })
    }
}

#[async_trait]
impl StoreClient for EtcdClient {
    async fn get(&self, key: &str) -> Result<Option<KeyValue>> {
        let body = json!({ "key": base64::encode(key) });
        let resp = self.post("/v3/kv/range", body).await?;
        let kvs = resp.get("kvs").and_then(|v| v.as_array());
        Ok(kvs.and_then(|a| a.first()).and_then(Self::kv_from_json))
    }

    async fn get_prefix(&self, prefix: &str) -> Result<Vec<KeyValue>> {
        let range_end = prefix_range_end(prefix);
        let body = json!({
            "key": base64::encode(prefix),
            "range_end": base64::encode(range_end),
        });
        let resp = self.post("/v3/kv/range", body).await?;
        let kvs = resp
            .get("kvs")
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(kvs.iter().filter_map(Self::kv_from_json).collect())
    }

    async fn put(&self, key: &str, value: Vec<u8>) -> Result<()> {
        let body = json!({ "key": base64::encode(key), "value": base64::encode(value) });
        self.post("/v3/kv/put", body).await?;
        Ok(())
    }

    async fn put_with_lease(&self, key: &str, value: Vec<u8>, lease: i64) -> Result<()> {
        let body = json!({
            "key": base64::encode(key),
            "value": base64::encode(value),
            "lease": lease.to_string(),
        });
        self.post("/v3/kv/put", body).await?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let body = json!({ "key": base64::encode(key) });
        self.post("/v3/kv/deleterange", body).await?;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64> {
        let range_end = prefix_range_end(prefix);
        let body = json!({
            "key": base64::encode(prefix),
            "range_end": base64::encode(range_end),
        });
        let resp = self.post("/v3/kv/deleterange", body).await?;
        let deleted = resp
            .get("deleted")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .unwrap_or(0);
        Ok(deleted)
    }

    async fn watch(&self, prefix: &str) -> Result<WatchStream> {
        let range_end = prefix_range_end(prefix);
        let body = json!({
            "create_request": {
                "key": base64::encode(prefix),
                "range_end": base64::encode(range_end),
            }
        });

        let resp = self
            .http
            .post(self.url("/v3/watch"))
            .json(&body)
            .send()
            .await
            .map_err(|e| StoreError::Unavailable(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(StoreError::Unavailable(format!(
                "etcd watch returned {}",
                resp.status()
            )));
        }

        // The gateway streams newline-delimited JSON objects, one per watch
        // response, for as long as the connection stays open.
        let byte_stream = resp.bytes_stream();
        let stream = async_stream::stream! {
            futures_util::pin_mut!(byte_stream);
            let mut pending = Vec::new();
            while let Some(chunk) = byte_stream.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        yield Err(StoreError::WatchInterrupted(e.to_string()));
                        return;
                    }
                };
                pending.extend_from_slice(&chunk);
                while let Some(pos) = pending.iter().position(|b| *b == b'\n') {
                    let line: Vec<u8> = pending.drain(..=pos).collect();
                    let line = &line[..line.len().saturating_sub(1)];
                    if line.is_empty() {
                        continue;
                    }
                    let parsed: Value = match serde_json::from_slice(line) {
                        Ok(v) => v,
                        Err(_) => continue,
                    };
                    let events = parsed
                        .get("result")
                        .and_then(|r| r.get("events"))
                        .and_then(|e| e.as_array())
                        .cloned()
                        .unwrap_or_default();
                    for ev in events {
                        let ev_type = ev.get("type").and_then(|t| t.as_str()).unwrap_or("PUT");
                        let kv = ev.get("kv").and_then(EtcdClient::kv_from_json);
                        let prev = ev
                            .get("prev_kv")
                            .and_then(|v| v.get("value"))
                            .and_then(|v| v.as_str())
                            .map(|s| base64::decode(s).unwrap_or_default());

                        if let Some(kv) = kv {
                            let kind = if ev_type == "DELETE" {
                                EventKind::Delete
                            } else if prev.is_some() {
                                EventKind::PutUpdate
                            } else {
                                EventKind::PutCreate
                            };
                            yield Ok(WatchEvent { kind, kv, prev_value: prev });
                        }
                    }
                }
            }
        };

        Ok(Box::pin(stream))
    }

    async fn grant_lease(&self, ttl_seconds: i64) -> Result<i64> {
        let body = json!({ "TTL": ttl_seconds });
        let resp = self.post("/v3/lease/grant", body).await?;
        resp.get("ID")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse().ok())
            .ok_or_else(|| StoreError::Unavailable("lease grant returned no ID".into()))
    }

    async fn revoke_lease(&self, lease: i64) -> Result<()> {
        let body = json!({ "ID": lease.to_string() });
        self.post("/v3/lease/revoke", body).await?;
        Ok(())
    }

    async fn keep_alive(&self, lease: i64) -> Result<()> {
        let body = json!({ "ID": lease.to_string() });
        self.post("/v3/lease/keepalive", body).await?;
        Ok(())
    }
}

/// Smallest range_end covering every key with `prefix` as a prefix, per
/// etcd's range-end convention (increment the last byte).
fn prefix_range_end(prefix: &str) -> Vec<u8> {
    let mut end = prefix.as_bytes().to_vec();
    for i in (0..end.len()).rev() {
        if end[i] < 0xff {
            end[i] += 1;
            end.truncate(i + 1);
            return end;
        }
    }
    vec![0]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_range_end() {
        assert_eq!(prefix_range_end("/services/"), b"/services0".to_vec());
        assert_eq!(prefix_range_end(""), vec![0]);
    }
}
