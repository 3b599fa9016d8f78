//! Controller configuration.

use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use lbaas_networking::{Ipv4Prefix, L3PortManager, MemoryL3PortManager, StaticL3PortManager};
use lbaas_reconcile::{BackoffPolicy, DEFAULT_REQUEUE_BASE, DEFAULT_REQUEUE_MAX};

use crate::agent::HttpAgentPusher;

/// Default cleanup period. Prime, and more than three times the usual
/// resync period of cluster caches.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(907);

pub const DEFAULT_AGENT_TIMEOUT: Duration = Duration::from_secs(5);

const DEFAULT_MEMORY_EXTERNAL_PREFIX: &str = "198.18.0.0/24";
const DEFAULT_MEMORY_INTERNAL_PREFIX: &str = "198.19.0.0/24";

/// Which L3 port backend to use.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PortManagerConfig {
    /// Fixed list of addresses.
    Static { addresses: Vec<Ipv4Addr> },

    /// In-process pool drawing addresses from two prefixes.
    Memory {
        external: Ipv4Prefix,
        internal: Ipv4Prefix,
    },
}

/// Controller configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Period of the cleanup timer.
    pub cleanup_interval: Duration,

    /// Backoff for requeued jobs.
    pub requeue_backoff: BackoffPolicy,

    pub port_manager: PortManagerConfig,

    /// Base URLs of the agents receiving the load-balancer model.
    pub agent_urls: Vec<String>,

    /// Timeout of one config push request.
    pub agent_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from a variable lookup function.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let cleanup_secs: u64 = parse_var(&lookup, "LBAAS_CLEANUP_INTERVAL_SECS")?
            .unwrap_or(DEFAULT_CLEANUP_INTERVAL.as_secs());
        if cleanup_secs == 0 {
            bail!("LBAAS_CLEANUP_INTERVAL_SECS must be greater than zero.");
        }

        let requeue_base = parse_var::<u64, _>(&lookup, "LBAAS_REQUEUE_BASE_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_REQUEUE_BASE);
        let requeue_max = parse_var::<u64, _>(&lookup, "LBAAS_REQUEUE_MAX_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_REQUEUE_MAX);
        if requeue_base.is_zero() {
            bail!("LBAAS_REQUEUE_BASE_MS must be greater than zero.");
        }
        if requeue_max < requeue_base {
            bail!("LBAAS_REQUEUE_MAX_SECS must not be smaller than LBAAS_REQUEUE_BASE_MS.");
        }
        let jitter: f64 = parse_var(&lookup, "LBAAS_REQUEUE_JITTER")?.unwrap_or(0.0);
        if !jitter.is_finite() {
            bail!("LBAAS_REQUEUE_JITTER must be a finite number.");
        }

        let port_manager = match lookup("LBAAS_PORT_MANAGER").as_deref().unwrap_or("static") {
            "static" => {
                let raw = lookup("LBAAS_STATIC_ADDRESSES").unwrap_or_default();
                let addresses = split_list(&raw)
                    .map(|addr| {
                        addr.parse::<Ipv4Addr>().with_context(|| {
                            format!("Invalid address in LBAAS_STATIC_ADDRESSES: {addr}")
                        })
                    })
                    .collect::<Result<Vec<_>>>()?;
                if addresses.is_empty() {
                    bail!(
                        "LBAAS_STATIC_ADDRESSES must list at least one IPv4 address \
                         for the static port manager."
                    );
                }
                PortManagerConfig::Static { addresses }
            }
            "memory" => PortManagerConfig::Memory {
                external: parse_prefix(
                    &lookup,
                    "LBAAS_MEMORY_EXTERNAL_PREFIX",
                    DEFAULT_MEMORY_EXTERNAL_PREFIX,
                )?,
                internal: parse_prefix(
                    &lookup,
                    "LBAAS_MEMORY_INTERNAL_PREFIX",
                    DEFAULT_MEMORY_INTERNAL_PREFIX,
                )?,
            },
            other => bail!("LBAAS_PORT_MANAGER must be 'static' or 'memory', got '{other}'."),
        };

        let agent_urls: Vec<String> = split_list(&lookup("LBAAS_AGENT_URLS").unwrap_or_default())
            .map(str::to_string)
            .collect();
        if let Some(url) = agent_urls
            .iter()
            .find(|url| !(url.starts_with("http://") || url.starts_with("https://")))
        {
            bail!("LBAAS_AGENT_URLS entries must be http(s) URLs, got '{url}'.");
        }

        let agent_timeout = parse_var::<u64, _>(&lookup, "LBAAS_AGENT_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_AGENT_TIMEOUT);

        Ok(Self {
            cleanup_interval: Duration::from_secs(cleanup_secs),
            requeue_backoff: BackoffPolicy::new(requeue_base, requeue_max).with_jitter(jitter),
            port_manager,
            agent_urls,
            agent_timeout,
        })
    }

    /// Create the configured L3 port backend.
    pub fn build_port_manager(&self) -> Arc<dyn L3PortManager> {
        match &self.port_manager {
            PortManagerConfig::Static { addresses } => {
                Arc::new(StaticL3PortManager::new(addresses.clone()))
            }
            PortManagerConfig::Memory { external, internal } => {
                Arc::new(MemoryL3PortManager::new(*external, *internal))
            }
        }
    }

    /// Create the agent pusher for the configured agents.
    pub fn build_pusher(&self) -> Result<HttpAgentPusher> {
        HttpAgentPusher::new(self.agent_urls.clone(), self.agent_timeout)
            .context("Failed to build agent HTTP client")
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|v| v.trim().parse::<T>())
        .transpose()
        .with_context(|| format!("{key} has an invalid value."))
}

fn parse_prefix<F>(lookup: &F, key: &str, default: &str) -> Result<Ipv4Prefix>
where
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key).unwrap_or_else(|| default.to_string());
    Ipv4Prefix::from_cidr(raw.trim()).with_context(|| format!("{key} must be an IPv4 CIDR."))
}

fn split_list(raw: &str) -> impl Iterator<Item = &str> {
    raw.split(',').map(str::trim).filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config =
            Config::from_lookup(lookup(&[("LBAAS_STATIC_ADDRESSES", "198.51.100.1")])).unwrap();

        assert_eq!(config.cleanup_interval, Duration::from_secs(907));
        assert_eq!(config.requeue_backoff.delay(0), Duration::from_millis(5));
        assert_eq!(config.agent_timeout, Duration::from_secs(5));
        assert!(config.agent_urls.is_empty());
        assert_eq!(
            config.port_manager,
            PortManagerConfig::Static {
                addresses: vec![Ipv4Addr::new(198, 51, 100, 1)]
            }
        );
    }

    #[test]
    fn test_memory_backend_and_agents() {
        let config = Config::from_lookup(lookup(&[
            ("LBAAS_PORT_MANAGER", "memory"),
            ("LBAAS_MEMORY_EXTERNAL_PREFIX", "203.0.113.0/28"),
            ("LBAAS_AGENT_URLS", "http://agent-1:8080, https://agent-2"),
            ("LBAAS_CLEANUP_INTERVAL_SECS", "60"),
        ]))
        .unwrap();

        assert_eq!(config.cleanup_interval, Duration::from_secs(60));
        assert_eq!(config.agent_urls, vec!["http://agent-1:8080", "https://agent-2"]);
        match &config.port_manager {
            PortManagerConfig::Memory { external, internal } => {
                assert_eq!(external.to_string(), "203.0.113.0/28");
                assert_eq!(internal.to_string(), DEFAULT_MEMORY_INTERNAL_PREFIX);
            }
            other => panic!("unexpected backend: {other:?}"),
        }
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        assert!(Config::from_lookup(lookup(&[])).is_err());
        assert!(Config::from_lookup(lookup(&[("LBAAS_STATIC_ADDRESSES", "not-an-ip")])).is_err());
        assert!(Config::from_lookup(lookup(&[
            ("LBAAS_STATIC_ADDRESSES", "198.51.100.1"),
            ("LBAAS_REQUEUE_BASE_MS", "soon"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup(&[("LBAAS_PORT_MANAGER", "cloud")])).is_err());
        assert!(Config::from_lookup(lookup(&[
            ("LBAAS_STATIC_ADDRESSES", "198.51.100.1"),
            ("LBAAS_REQUEUE_BASE_MS", "0"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup(&[
            ("LBAAS_STATIC_ADDRESSES", "198.51.100.1"),
            ("LBAAS_REQUEUE_BASE_MS", "5000"),
            ("LBAAS_REQUEUE_MAX_SECS", "1"),
        ]))
        .is_err());
        assert!(Config::from_lookup(lookup(&[
            ("LBAAS_STATIC_ADDRESSES", "198.51.100.1"),
            ("LBAAS_AGENT_URLS", "agent-1:8080"),
        ]))
        .is_err());
    }
}
