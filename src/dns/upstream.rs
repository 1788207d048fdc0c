//! Async client for forwarding queries to upstream DNS servers. UDP first,
//! falling back to TCP when the UDP reply comes back truncated.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use derive_more::{Display, Error, From};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::time::timeout;

use crate::cache::watch_task;
use crate::dns::buffer::{BytePacketBuffer, PacketBuffer, StreamPacketBuffer};
use crate::dns::protocol::{DnsPacket, DnsQuestion, QueryType};
use crate::shutdown::Shutdown;
use crate::store::{EventKind, StoreClient};

/// Store key the config/state surface writes to and this pool watches.
pub const UPSTREAM_CONFIG_KEY: &str = "/config/dns/upstream_dns";

#[derive(Debug, Display, From, Error)]
pub enum UpstreamError {
    Io(std::io::Error),
    Protocol(crate::dns::protocol::ProtocolError),
    #[display(fmt = "upstream query timed out")]
    Timeout,
}

type Result<T> = std::result::Result<T, UpstreamError>;

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Forwards queries to a single configured upstream. The daemon holds one of
/// these per configured upstream and round-robins across them.
pub struct UpstreamClient {
    seq: AtomicU16,
}

impl Default for UpstreamClient {
    fn default() -> Self {
        Self::new()
    }
}

impl UpstreamClient {
    pub fn new() -> Self {
        UpstreamClient {
            seq: AtomicU16::new(0),
        }
    }

    pub async fn query(
        &self,
        qname: &str,
        qtype: QueryType,
        upstream: SocketAddr,
    ) -> Result<DnsPacket> {
        let response = self.query_udp(qname, qtype, upstream).await?;
        if !response.header.truncated_message {
            return Ok(response);
        }
        tracing::debug!(%upstream, qname, "udp response truncated, retrying over tcp");
        self.query_tcp(qname, qtype, upstream).await
    }

    async fn query_udp(
        &self,
        qname: &str,
        qtype: QueryType,
        upstream: SocketAddr,
    ) -> Result<DnsPacket> {
        let socket = UdpSocket::bind(("0.0.0.0", 0)).await?;
        socket.connect(upstream).await?;

        let mut packet = self.build_query(qname, qtype);
        let mut req_buffer = BytePacketBuffer::new();
        packet.write(&mut req_buffer, 512)?;
        socket.send(&req_buffer.buf[0..req_buffer.pos]).await?;

        let mut res_buffer = BytePacketBuffer::new();
        let len = timeout(QUERY_TIMEOUT, socket.recv(&mut res_buffer.buf))
            .await
            .map_err(|_| UpstreamError::Timeout)??;
        let _ = len;

        packet = DnsPacket::from_buffer(&mut res_buffer)?;
        Ok(packet)
    }

    async fn query_tcp(
        &self,
        qname: &str,
        qtype: QueryType,
        upstream: SocketAddr,
    ) -> Result<DnsPacket> {
        let mut stream = timeout(QUERY_TIMEOUT, TcpStream::connect(upstream))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        let packet = self.build_query(qname, qtype);
        let mut req_buffer = BytePacketBuffer::new();
        packet.write(&mut req_buffer, 0xFFFF)?;

        let len = req_buffer.pos();
        let mut framed = Vec::with_capacity(len + 2);
        framed.write_all(&(len as u16).to_be_bytes())?;
        framed.write_all(&req_buffer.buf[0..len])?;
        timeout(QUERY_TIMEOUT, stream.write_all(&framed))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        let mut len_buf = [0u8; 2];
        timeout(QUERY_TIMEOUT, stream.read_exact(&mut len_buf))
            .await
            .map_err(|_| UpstreamError::Timeout)??;
        let res_len = u16::from_be_bytes(len_buf) as usize;

        let mut res_bytes = vec![0u8; res_len];
        timeout(QUERY_TIMEOUT, stream.read_exact(&mut res_bytes))
            .await
            .map_err(|_| UpstreamError::Timeout)??;

        let mut cursor = std::io::Cursor::new(res_bytes);
        let mut stream_buffer = StreamPacketBuffer::new(&mut cursor);
        let packet = DnsPacket::from_buffer(&mut stream_buffer)?;
        Ok(packet)
    }

    fn build_query(&self, qname: &str, qtype: QueryType) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.id = self.seq.fetch_add(1, Ordering::Relaxed);
        packet.header.questions = 1;
        packet.header.recursion_desired = true;
        packet.questions.push(DnsQuestion::new(qname.to_string(), qtype));
        packet
    }
}

/// Round-robins queries across a list of upstream servers, retrying the
/// next upstream when one fails. The list can be swapped at runtime through
/// the admin surface's `SetUpstreamDNS` operation.
pub struct UpstreamPool {
    client: UpstreamClient,
    upstreams: parking_lot::RwLock<Vec<SocketAddr>>,
    next: AtomicU16,
}

impl UpstreamPool {
    pub fn new(upstreams: Vec<SocketAddr>) -> Self {
        UpstreamPool {
            client: UpstreamClient::new(),
            upstreams: parking_lot::RwLock::new(upstreams),
            next: AtomicU16::new(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.upstreams.read().is_empty()
    }

    pub fn replace(&self, upstreams: Vec<SocketAddr>) {
        *self.upstreams.write() = upstreams;
    }

    pub async fn resolve(&self, qname: &str, qtype: QueryType) -> Result<DnsPacket> {
        let upstreams = self.upstreams.read().clone();
        if upstreams.is_empty() {
            return Err(UpstreamError::Io(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no upstream servers configured",
            )));
        }

        let start = self.next.fetch_add(1, Ordering::Relaxed) as usize % upstreams.len();
        let mut last_err = None;
        for offset in 0..upstreams.len() {
            let upstream = upstreams[(start + offset) % upstreams.len()];
            match self.client.query(qname, qtype, upstream).await {
                Ok(packet) => {
                    crate::dns::metrics::UPSTREAM_QUERIES
                        .with_label_values(&[&upstream.to_string(), "success"])
                        .inc();
                    return Ok(packet);
                }
                Err(e) => {
                    crate::dns::metrics::UPSTREAM_QUERIES
                        .with_label_values(&[&upstream.to_string(), "failure"])
                        .inc();
                    tracing::warn!(%upstream, error = %e, "upstream query failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap())
    }

    /// Spawns the watch on [`UPSTREAM_CONFIG_KEY`] that keeps this pool's
    /// upstream list in sync with whatever the admin surface's
    /// `SetUpstreamDNS` most recently wrote to the store, on this process and
    /// every other one watching the same key.
    pub fn spawn_watch(self: Arc<Self>, store: Arc<dyn StoreClient>, shutdown: Shutdown) {
        tokio::spawn(async move {
            watch_task::run(
                store,
                UPSTREAM_CONFIG_KEY,
                shutdown,
                {
                    let pool = self.clone();
                    move |kvs| {
                        if let Some(kv) = kvs.into_iter().next() {
                            pool.replace(parse_upstream_config(&kv.value));
                        }
                    }
                },
                {
                    let pool = self.clone();
                    move |event| match event.kind {
                        EventKind::Delete => {}
                        EventKind::PutCreate | EventKind::PutUpdate => {
                            pool.replace(parse_upstream_config(&event.kv.value));
                        }
                    }
                },
            )
            .await;
        });
    }
}

/// Parses the JSON array of address strings the admin surface writes.
/// A value that doesn't parse as JSON is treated as a single bare address,
/// for backward compatibility with a plain-string write.
fn parse_upstream_config(value: &[u8]) -> Vec<SocketAddr> {
    let addrs: Vec<String> = serde_json::from_slice(value)
        .unwrap_or_else(|_| vec![String::from_utf8_lossy(value).trim().to_string()]);

    addrs
        .iter()
        .filter_map(|addr| match addr.parse() {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::warn!(addr, error = %e, "ignoring invalid upstream address from config watch");
                None
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_pool_reports_no_upstreams() {
        let pool = UpstreamPool::new(vec![]);
        assert!(pool.is_empty());
    }

    #[test]
    fn test_parse_upstream_config_json_array() {
        let addrs = parse_upstream_config(br#"["1.1.1.1:53","8.8.8.8:53"]"#);
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn test_parse_upstream_config_bare_address_fallback() {
        let addrs = parse_upstream_config(b"9.9.9.9:53");
        assert_eq!(addrs, vec!["9.9.9.9:53".parse().unwrap()]);
    }

    #[test]
    fn test_parse_upstream_config_drops_invalid_entries() {
        let addrs = parse_upstream_config(br#"["1.1.1.1:53","not-an-addr"]"#);
        assert_eq!(addrs, vec!["1.1.1.1:53".parse().unwrap()]);
    }

    #[test]
    fn test_build_query_increments_sequence() {
        let client = UpstreamClient::new();
        let p1 = client.build_query("a.example.", QueryType::A);
        let p2 = client.build_query("b.example.", QueryType::A);
        assert_ne!(p1.header.id, p2.header.id);
    }
}
