//! Flat configuration surface: a YAML file with CLI flag and
//! `KONG_DISCOVERY_`-prefixed environment variable overrides, courtesy of
//! `clap`'s `env` feature.

use std::fs;
use std::net::SocketAddr;
use std::path::PathBuf;

use clap::Parser;
use derive_more::{Display, Error, From};
use serde_derive::{Deserialize, Serialize};

#[derive(Debug, Display, From, Error)]
pub enum ConfigError {
    Io(std::io::Error),
    Yaml(serde_yaml::Error),
    #[display(fmt = "invalid upstream address {_0}")]
    #[from(ignore)]
    InvalidUpstream(String),
}

type Result<T> = std::result::Result<T, ConfigError>;

#[derive(Parser, Debug)]
#[command(name = "kong-discoveryd", about = "Service registry and authoritative DNS resolver")]
pub struct Cli {
    /// Path to the YAML configuration file.
    #[arg(long, env = "KONG_DISCOVERY_CONFIG", default_value = "kong-discovery.yaml")]
    pub config: PathBuf,

    /// Override the DNS listener port.
    #[arg(long, env = "KONG_DISCOVERY_DNS_PORT")]
    pub dns_port: Option<u16>,

    /// Override the admin HTTP listener port.
    #[arg(long, env = "KONG_DISCOVERY_ADMIN_PORT")]
    pub admin_port: Option<u16>,

    /// Override the log level filter passed to `tracing-subscriber`.
    #[arg(long, env = "KONG_DISCOVERY_LOG_LEVEL")]
    pub log_level: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// "memory" or "etcd".
    pub backend: String,
    pub etcd_endpoint: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            backend: "memory".to_string(),
            etcd_endpoint: "http://127.0.0.1:2379".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub dns_port: u16,
    pub admin_port: u16,
    #[serde(default = "default_true")]
    pub enable_dns_udp: bool,
    #[serde(default = "default_true")]
    pub enable_dns_tcp: bool,
    pub service_domain: String,
    pub default_ttl_seconds: u32,
    pub default_namespace: String,
    pub upstream_dns: Vec<String>,
    pub heartbeat_timeout_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub log_level: String,
    pub log_dir: String,
}

fn default_true() -> bool {
    true
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig::default(),
            dns_port: 53,
            admin_port: 8500,
            enable_dns_udp: true,
            enable_dns_tcp: true,
            service_domain: "service.local".to_string(),
            default_ttl_seconds: 30,
            default_namespace: "default".to_string(),
            upstream_dns: vec!["8.8.8.8:53".to_string(), "1.1.1.1:53".to_string()],
            heartbeat_timeout_seconds: 30,
            sweep_interval_seconds: 30,
            log_level: "info".to_string(),
            log_dir: "/var/log/kong-discoveryd".to_string(),
        }
    }
}

impl Config {
    pub fn load(cli: &Cli) -> Result<Config> {
        let mut config = if cli.config.exists() {
            let raw = fs::read_to_string(&cli.config)?;
            serde_yaml::from_str(&raw)?
        } else {
            Config::default()
        };

        if let Some(port) = cli.dns_port {
            config.dns_port = port;
        }
        if let Some(port) = cli.admin_port {
            config.admin_port = port;
        }
        if let Some(level) = &cli.log_level {
            config.log_level = level.clone();
        }

        Ok(config)
    }

    pub fn upstream_addrs(&self) -> Result<Vec<SocketAddr>> {
        self.upstream_dns
            .iter()
            .map(|s| {
                s.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidUpstream(s.clone()))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_has_sane_upstreams() {
        let config = Config::default();
        let addrs = config.upstream_addrs().unwrap();
        assert_eq!(addrs.len(), 2);
    }

    #[test]
    fn test_invalid_upstream_is_rejected() {
        let mut config = Config::default();
        config.upstream_dns = vec!["not-an-address".to_string()];
        assert!(config.upstream_addrs().is_err());
    }

    #[test]
    fn test_default_backend_is_memory() {
        assert_eq!(Config::default().store.backend, "memory");
    }
}
