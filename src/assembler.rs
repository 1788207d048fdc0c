//! Composes DNS answers from the watch-driven caches. Owns no state of its
//! own beyond the configured service domain and default TTL.

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use crate::cache::Caches;
use crate::dns::protocol::{DnsRecord, QueryType, TransientTtl};
use crate::model::{RecordType, ServiceInstance};

pub struct Assembled {
    pub answers: Vec<DnsRecord>,
    pub additional: Vec<DnsRecord>,
}

impl Assembled {
    fn empty() -> Self {
        Assembled {
            answers: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.answers.is_empty()
    }
}

pub struct RecordAssembler {
    caches: Arc<Caches>,
    service_domain: String,
    default_ttl: u32,
}

enum ParsedName {
    Local { namespace: String, name: String },
    External,
}

impl RecordAssembler {
    pub fn new(caches: Arc<Caches>, service_domain: String, default_ttl: u32) -> Self {
        let service_domain = normalize(&service_domain);
        RecordAssembler {
            caches,
            service_domain,
            default_ttl,
        }
    }

    pub fn is_local(&self, qname: &str) -> bool {
        matches!(self.parse(qname), ParsedName::Local { .. })
    }

    /// Decomposes a qname into `(namespace, service)` per the three
    /// supported local forms; SRV-style `_service._tcp[.namespace]` names are
    /// unwrapped to their plain service form before the two-label match.
    fn parse(&self, qname: &str) -> ParsedName {
        let qname = normalize(qname);
        let Some(rest) = qname.strip_suffix(&self.service_domain) else {
            return ParsedName::External;
        };
        let rest = rest.trim_end_matches('.');
        if rest.is_empty() {
            return ParsedName::External;
        }

        let rest = rest
            .strip_prefix('_')
            .and_then(|r| r.split_once("._tcp"))
            .map(|(service, tail)| format!("{service}{tail}"))
            .unwrap_or_else(|| rest.to_string());

        let labels: Vec<&str> = rest.split('.').collect();
        match labels.as_slice() {
            [name] => ParsedName::Local {
                name: name.to_string(),
                namespace: "default".to_string(),
            },
            [name, namespace] => ParsedName::Local {
                name: name.to_string(),
                namespace: namespace.to_string(),
            },
            _ => ParsedName::External,
        }
    }

    pub fn resolve(&self, qname: &str, qtype: QueryType) -> Assembled {
        let (namespace, name) = match self.parse(qname) {
            ParsedName::Local { namespace, name } => (namespace, name),
            ParsedName::External => return self.resolve_custom(qname, qtype),
        };

        let instances = self.caches.instances.list_healthy_by_name(&namespace, &name);
        if instances.is_empty() {
            return Assembled::empty();
        }

        match qtype {
            QueryType::A => self.assemble_a(qname, &instances),
            QueryType::Aaaa => self.assemble_aaaa(qname, &instances),
            QueryType::Srv => self.assemble_srv(qname, &namespace, &name, &instances),
            _ => Assembled::empty(),
        }
    }

    fn assemble_a(&self, qname: &str, instances: &[ServiceInstance]) -> Assembled {
        let answers = instances
            .iter()
            .filter_map(|i| i.ip.parse::<Ipv4Addr>().ok().map(|addr| (i, addr)))
            .map(|(_, addr)| DnsRecord::A {
                domain: qname.to_string(),
                addr,
                ttl: TransientTtl(self.default_ttl),
            })
            .collect();
        Assembled {
            answers,
            additional: Vec::new(),
        }
    }

    fn assemble_aaaa(&self, qname: &str, instances: &[ServiceInstance]) -> Assembled {
        let answers = instances
            .iter()
            .filter_map(|i| i.ip.parse::<Ipv6Addr>().ok())
            .map(|addr| DnsRecord::Aaaa {
                domain: qname.to_string(),
                addr,
                ttl: TransientTtl(self.default_ttl),
            })
            .collect();
        Assembled {
            answers,
            additional: Vec::new(),
        }
    }

    fn assemble_srv(
        &self,
        qname: &str,
        namespace: &str,
        name: &str,
        instances: &[ServiceInstance],
    ) -> Assembled {
        let mut answers = Vec::with_capacity(instances.len());
        let mut additional = Vec::with_capacity(instances.len());

        for (i, instance) in instances.iter().enumerate() {
            let target = format!(
                "instance-{i}.{name}.{namespace}.{}",
                self.service_domain
            );

            answers.push(DnsRecord::Srv {
                domain: qname.to_string(),
                priority: 0,
                weight: 0,
                port: instance.port,
                host: target.clone(),
                ttl: TransientTtl(self.default_ttl),
            });

            if let Ok(addr) = instance.ip.parse::<Ipv4Addr>() {
                additional.push(DnsRecord::A {
                    domain: target,
                    addr,
                    ttl: TransientTtl(self.default_ttl),
                });
            }
        }

        Assembled { answers, additional }
    }

    /// Falls through to the custom-record cache, checking associations first
    /// so an administered redirect can synthesize records from a service.
    fn resolve_custom(&self, qname: &str, qtype: QueryType) -> Assembled {
        let record_type = match to_record_type(qtype) {
            Some(rt) => rt,
            None => return Assembled::empty(),
        };

        if let Some(assoc) = self.caches.records.get_association(qname, record_type) {
            let instances = self
                .caches
                .instances
                .list_healthy_by_name(&assoc.namespace, &assoc.service_name);
            if instances.is_empty() {
                return Assembled::empty();
            }
            return match qtype {
                QueryType::A => self.assemble_a(qname, &instances),
                QueryType::Aaaa => self.assemble_aaaa(qname, &instances),
                QueryType::Srv => {
                    self.assemble_srv(qname, &assoc.namespace, &assoc.service_name, &instances)
                }
                _ => Assembled::empty(),
            };
        }

        let Some(record) = self.caches.records.get_record(qname, record_type) else {
            return Assembled::empty();
        };

        let dns_record = match build_record(&record) {
            Some(r) => r,
            None => return Assembled::empty(),
        };

        Assembled {
            answers: vec![dns_record],
            additional: Vec::new(),
        }
    }
}

fn to_record_type(qtype: QueryType) -> Option<RecordType> {
    match qtype {
        QueryType::A => Some(RecordType::A),
        QueryType::Aaaa => Some(RecordType::Aaaa),
        QueryType::Cname => Some(RecordType::Cname),
        QueryType::Mx => Some(RecordType::Mx),
        QueryType::Txt => Some(RecordType::Txt),
        QueryType::Srv => Some(RecordType::Srv),
        _ => None,
    }
}

fn build_record(record: &crate::model::CustomRecord) -> Option<DnsRecord> {
    let ttl = TransientTtl(record.ttl_seconds);
    match record.record_type {
        RecordType::A => record.value.parse::<Ipv4Addr>().ok().map(|addr| DnsRecord::A {
            domain: record.domain.clone(),
            addr,
            ttl,
        }),
        RecordType::Aaaa => record.value.parse::<Ipv6Addr>().ok().map(|addr| DnsRecord::Aaaa {
            domain: record.domain.clone(),
            addr,
            ttl,
        }),
        RecordType::Cname => Some(DnsRecord::Cname {
            domain: record.domain.clone(),
            host: record.value.clone(),
            ttl,
        }),
        RecordType::Mx => {
            let (priority, host) = record.value.split_once(' ')?;
            Some(DnsRecord::Mx {
                domain: record.domain.clone(),
                priority: priority.parse().ok()?,
                host: host.to_string(),
                ttl,
            })
        }
        RecordType::Txt => Some(DnsRecord::Txt {
            domain: record.domain.clone(),
            data: record.value.clone(),
            ttl,
        }),
        RecordType::Srv => {
            let mut parts = record.value.split(' ');
            Some(DnsRecord::Srv {
                domain: record.domain.clone(),
                priority: parts.next()?.parse().ok()?,
                weight: parts.next()?.parse().ok()?,
                port: parts.next()?.parse().ok()?,
                host: parts.next()?.to_string(),
                ttl,
            })
        }
    }
}

fn normalize(domain: &str) -> String {
    let mut d = domain.to_lowercase();
    if !d.ends_with('.') {
        d.push('.');
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Health;
    use chrono::Utc;
    use std::collections::HashMap;

    fn instance(name: &str, ns: &str, ip: &str, port: u16) -> ServiceInstance {
        ServiceInstance {
            instance_id: ServiceInstance::new_id(),
            name: name.to_string(),
            namespace: ns.to_string(),
            ip: ip.to_string(),
            port,
            tags: vec![],
            metadata: HashMap::new(),
            ttl_seconds: 30,
            health: Health::Healthy,
            registered_at: Utc::now(),
            last_heartbeat: Utc::now(),
            load_balance_policy: Default::default(),
            weight: 0,
            lease_id: None,
        }
    }

    fn assembler_with(instances: Vec<ServiceInstance>) -> RecordAssembler {
        let caches = Arc::new(Caches::new());
        caches.instances.replace_all(instances);
        RecordAssembler::new(caches, "service.local".to_string(), 30)
    }

    #[test]
    fn test_a_record_one_instance() {
        let assembler = assembler_with(vec![instance("api", "default", "10.0.0.5", 8080)]);
        let result = assembler.resolve("api.service.local.", QueryType::A);
        assert_eq!(result.answers.len(), 1);
        match &result.answers[0] {
            DnsRecord::A { addr, .. } => assert_eq!(addr.to_string(), "10.0.0.5"),
            _ => panic!("expected A record"),
        }
    }

    #[test]
    fn test_a_record_two_instances_union_of_ips() {
        let assembler = assembler_with(vec![
            instance("api", "default", "10.0.0.5", 8080),
            instance("api", "default", "10.0.0.6", 8081),
        ]);
        let result = assembler.resolve("api.service.local.", QueryType::A);
        assert_eq!(result.answers.len(), 2);
    }

    #[test]
    fn test_srv_includes_matching_additional_a_record() {
        let assembler = assembler_with(vec![
            instance("api", "default", "10.0.0.5", 8080),
            instance("api", "default", "10.0.0.6", 8081),
        ]);
        let result = assembler.resolve("_api._tcp.service.local.", QueryType::Srv);
        assert_eq!(result.answers.len(), 2);
        assert_eq!(result.additional.len(), 2);

        let DnsRecord::Srv { host, port, .. } = &result.answers[0] else {
            panic!("expected srv record");
        };
        let matching_a = result.additional.iter().find(|r| match r {
            DnsRecord::A { domain, .. } => domain == host,
            _ => false,
        });
        assert!(matching_a.is_some());
        assert_eq!(*port, 8080);
    }

    #[test]
    fn test_namespace_isolation() {
        let assembler = assembler_with(vec![instance("api", "prod", "10.0.1.5", 9000)]);
        assert!(assembler
            .resolve("api.service.local.", QueryType::A)
            .is_empty());
        assert!(!assembler
            .resolve("api.prod.service.local.", QueryType::A)
            .is_empty());
    }

    #[test]
    fn test_external_name_is_not_local() {
        let assembler = assembler_with(vec![]);
        assert!(!assembler.is_local("www.example.com."));
        assert!(assembler.is_local("api.service.local."));
    }
}
