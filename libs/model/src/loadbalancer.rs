//! Forwarding model pushed to the edge agents.

use serde::{Deserialize, Serialize};

use crate::Protocol;

/// Forward one inbound port to a set of destinations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortForward {
    pub protocol: Protocol,
    pub inbound_port: u16,
    pub destination_addresses: Vec<String>,
    pub destination_port: u16,

    #[serde(default, rename = "policy", skip_serializing_if = "String::is_empty")]
    pub balance_policy: String,
}

/// All forwards terminating on one L3 port address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressIp {
    pub address: String,
    pub ports: Vec<PortForward>,
}

/// The complete load-balancer model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadBalancer {
    pub ingress: Vec<IngressIp>,
}

impl LoadBalancer {
    /// Total number of port forwards across all ingress addresses.
    pub fn forward_count(&self) -> usize {
        self.ingress.iter().map(|i| i.ports.len()).sum()
    }
}
