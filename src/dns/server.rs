//! UDP and TCP listeners. Each incoming query is answered from the record
//! assembler when the name is locally owned, or forwarded upstream (through
//! the response cache) otherwise.

use std::io::Write;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use derive_more::{Display, Error, From};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, UdpSocket};

use crate::dns::buffer::{BytePacketBuffer, PacketBuffer, StreamPacketBuffer, VectorPacketBuffer};
use crate::dns::context::DnsServerContext;
use crate::dns::protocol::{DnsPacket, DnsRecord, QueryType, ResultCode};
use crate::shutdown::Shutdown;

#[derive(Debug, Display, From, Error)]
pub enum ServerError {
    Io(std::io::Error),
}

type Result<T> = std::result::Result<T, ServerError>;

/// Answers a single question. Always returns a well-formed packet, even on
/// internal failure, since the caller still needs something to send back.
pub async fn execute_query(context: Arc<DnsServerContext>, request: &DnsPacket) -> DnsPacket {
    let mut packet = DnsPacket::new();
    packet.header.id = request.header.id;
    packet.header.recursion_available = context.allow_recursive;
    packet.header.response = true;

    if request.questions.is_empty() {
        packet.header.rescode = ResultCode::FORMERR;
        return packet;
    }
    if request.header.recursion_desired && !context.allow_recursive {
        packet.header.rescode = ResultCode::REFUSED;
        return packet;
    }

    let question = &request.questions[0];
    packet.questions.push(question.clone());

    if context.assembler.is_local(&question.name) {
        packet.header.authoritative_answer = true;
        let assembled = context.assembler.resolve(&question.name, question.qtype);
        if assembled.is_empty() {
            packet.header.rescode = ResultCode::NXDOMAIN;
        } else {
            packet.answers = assembled.answers;
            packet.resources = assembled.additional;
        }
        return packet;
    }

    resolve_upstream(context, &mut packet, question.qtype, &question.name).await;
    packet
}

async fn resolve_upstream(
    context: Arc<DnsServerContext>,
    packet: &mut DnsPacket,
    qtype: QueryType,
    qname: &str,
) {
    if let Some(cached) = context.response_cache.lookup(qname, qtype) {
        context.metrics.tracker().track_cache_hit("upstream");
        packet.header.rescode = cached.header.rescode;
        packet.answers = cached.answers;
        packet.authorities = cached.authorities;
        packet.resources = cached.resources;
        return;
    }
    context.metrics.tracker().track_cache_miss("upstream");

    let start = Instant::now();
    match context.upstreams.resolve(qname, qtype).await {
        Ok(result) => {
            context
                .metrics
                .record_upstream_duration("default", start.elapsed());
            packet.header.rescode = result.header.rescode;
            packet.answers = result.answers.clone();
            packet.authorities = result.authorities.clone();
            packet.resources = result.resources.clone();

            if result.header.rescode == ResultCode::NXDOMAIN {
                let _ = context.response_cache.store_nxdomain(qname, qtype, 60);
            } else if !result.answers.is_empty() {
                let _ = context.response_cache.store(&result.answers);
            }
        }
        Err(e) => {
            tracing::warn!(qname, error = %e, "upstream resolution failed");
            packet.header.rescode = ResultCode::SERVFAIL;
        }
    }
}

fn build_response_buffer(packet: &mut DnsPacket, size_limit: usize) -> std::result::Result<VectorPacketBuffer, crate::dns::protocol::ProtocolError> {
    let mut buffer = VectorPacketBuffer::new();
    packet.write(&mut buffer, size_limit)?;
    Ok(buffer)
}

pub struct DnsUdpServer {
    context: Arc<DnsServerContext>,
}

impl DnsUdpServer {
    pub fn new(context: Arc<DnsServerContext>) -> Self {
        DnsUdpServer { context }
    }

    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        let socket = Arc::new(UdpSocket::bind(("0.0.0.0", self.context.dns_port)).await?);
        tracing::info!(port = self.context.dns_port, "udp dns listener started");

        loop {
            let mut req_buffer = BytePacketBuffer::new();
            let recv = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                res = socket.recv_from(&mut req_buffer.buf) => res,
            };

            let (_, src) = match recv {
                Ok(x) => x,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to read from udp socket");
                    continue;
                }
            };

            self.context
                .statistics
                .udp_query_count
                .fetch_add(1, Ordering::Release);

            let context = self.context.clone();
            let socket = socket.clone();
            tokio::spawn(async move {
                let request = match DnsPacket::from_buffer(&mut req_buffer) {
                    Ok(p) => p,
                    Err(e) => {
                        tracing::info!(error = %e, "failed to parse udp query");
                        return;
                    }
                };

                let mut size_limit = 512;
                if request.resources.len() == 1 {
                    if let DnsRecord::Opt { packet_len, .. } = request.resources[0] {
                        size_limit = packet_len as usize;
                    }
                }

                let mut packet = execute_query(context, &request).await;
                let res_buffer = match build_response_buffer(&mut packet, size_limit) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to encode response");
                        return;
                    }
                };

                let len = res_buffer.pos();
                if let Ok(data) = res_buffer.get_range(0, len) {
                    if let Err(e) = socket.send_to(data, src).await {
                        tracing::info!(error = %e, "failed to send udp response");
                    }
                }
            });
        }
    }
}

pub struct DnsTcpServer {
    context: Arc<DnsServerContext>,
}

impl DnsTcpServer {
    pub fn new(context: Arc<DnsServerContext>) -> Self {
        DnsTcpServer { context }
    }

    pub async fn run(self, shutdown: Shutdown) -> Result<()> {
        let listener = TcpListener::bind(("0.0.0.0", self.context.dns_port)).await?;
        tracing::info!(port = self.context.dns_port, "tcp dns listener started");

        loop {
            let accepted = tokio::select! {
                _ = shutdown.cancelled() => return Ok(()),
                res = listener.accept() => res,
            };

            let (stream, _addr) = match accepted {
                Ok(x) => x,
                Err(e) => {
                    tracing::info!(error = %e, "failed to accept tcp connection");
                    continue;
                }
            };

            self.context
                .statistics
                .tcp_query_count
                .fetch_add(1, Ordering::Release);

            let context = self.context.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_tcp_connection(context, stream).await {
                    tracing::info!(error = %e, "tcp connection failed");
                }
            });
        }
    }
}

async fn handle_tcp_connection(context: Arc<DnsServerContext>, mut stream: TcpStream) -> Result<()> {
    let mut len_buf = [0u8; 2];
    stream.read_exact(&mut len_buf).await?;
    let req_len = u16::from_be_bytes(len_buf) as usize;

    let mut req_bytes = vec![0u8; req_len];
    stream.read_exact(&mut req_bytes).await?;

    let mut cursor = std::io::Cursor::new(req_bytes);
    let request = {
        let mut stream_buffer = StreamPacketBuffer::new(&mut cursor);
        DnsPacket::from_buffer(&mut stream_buffer)
    };
    let request = match request {
        Ok(p) => p,
        Err(e) => {
            tracing::info!(error = %e, "failed to parse tcp query");
            return Ok(());
        }
    };

    let mut packet = execute_query(context, &request).await;
    let res_buffer = build_response_buffer(&mut packet, 0xFFFF)
        .map_err(|e| ServerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;
    let len = res_buffer.pos();
    let data = res_buffer
        .get_range(0, len)
        .map_err(|e| ServerError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())))?;

    let mut framed = Vec::with_capacity(len + 2);
    framed.write_all(&(len as u16).to_be_bytes())?;
    framed.write_all(data)?;
    stream.write_all(&framed).await?;
    stream.shutdown().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dns::context::tests::create_test_context;
    use crate::dns::protocol::{DnsQuestion, TransientTtl};
    use std::net::Ipv4Addr;

    fn build_query(qname: &str, qtype: QueryType) -> DnsPacket {
        let mut packet = DnsPacket::new();
        packet.header.recursion_desired = true;
        packet.questions.push(DnsQuestion::new(qname.into(), qtype));
        packet
    }

    #[tokio::test]
    async fn test_execute_query_formerr_on_no_question() {
        let context = create_test_context();
        let res = execute_query(context, &DnsPacket::new()).await;
        assert_eq!(ResultCode::FORMERR, res.header.rescode);
    }

    #[tokio::test]
    async fn test_execute_query_refused_without_recursion() {
        let mut context_ref = create_test_context();
        Arc::get_mut(&mut context_ref).unwrap().allow_recursive = false;
        let res = execute_query(context_ref, &build_query("example.com.", QueryType::A)).await;
        assert_eq!(ResultCode::REFUSED, res.header.rescode);
    }

    #[tokio::test]
    async fn test_execute_query_local_name_resolves_from_assembler() {
        use crate::assembler::RecordAssembler;
        use crate::cache::Caches;
        use crate::dns::metrics::MetricsCollector;
        use crate::dns::upstream::UpstreamPool;
        use crate::model::{Health, ServiceInstance};
        use chrono::Utc;
        use std::collections::HashMap;

        let caches = Arc::new(Caches::new());
        caches.instances.replace_all(vec![ServiceInstance {
            instance_id: ServiceInstance::new_id(),
            name: "api".to_string(),
            namespace: "default".to_string(),
            ip: "10.0.0.5".to_string(),
            port: 8080,
            tags: vec![],
            metadata: HashMap::new(),
            ttl_seconds: 30,
            health: Health::Healthy,
            registered_at: Utc::now(),
            last_heartbeat: Utc::now(),
            load_balance_policy: Default::default(),
            weight: 0,
            lease_id: None,
        }]);
        let assembler = Arc::new(RecordAssembler::new(caches, "service.local".to_string(), 30));
        let context = Arc::new(DnsServerContext::new(
            assembler,
            Arc::new(UpstreamPool::new(vec![])),
            Arc::new(MetricsCollector::new()),
            0,
        ));

        let res = execute_query(context, &build_query("api.service.local.", QueryType::A)).await;
        assert_eq!(ResultCode::NOERROR, res.header.rescode);
        assert_eq!(1, res.answers.len());
        match res.answers[0] {
            DnsRecord::A { addr, .. } => assert_eq!(addr, Ipv4Addr::new(10, 0, 0, 5)),
            _ => panic!("expected A record"),
        }
    }

    #[tokio::test]
    async fn test_execute_query_local_name_not_found_is_nxdomain() {
        let context = create_test_context();
        let res = execute_query(context, &build_query("missing.service.local.", QueryType::A)).await;
        assert_eq!(ResultCode::NXDOMAIN, res.header.rescode);
    }
}
