//! The controller's view of a cluster service object.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::{L4Port, Protocol, ServiceIdentifier};

/// Service exposure type. Only `LoadBalancer` services are eligible for management.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ServiceType {
    ClusterIP,
    NodePort,
    LoadBalancer,
}

/// A port declared on a service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    pub protocol: Protocol,

    /// Port exposed on the load balancer.
    pub port: u16,

    /// Port opened on every node, if allocated.
    #[serde(default)]
    pub node_port: Option<u16>,
}

/// One entry of the externally visible load-balancer status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressStatus {
    #[serde(default)]
    pub ip: String,

    #[serde(default)]
    pub hostname: String,
}

/// A service object as stored in the cluster.
///
/// `resource_version` changes on every persisted update; updates carrying a
/// stale version are rejected by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: ServiceIdentifier,

    pub service_type: ServiceType,

    #[serde(default)]
    pub annotations: BTreeMap<String, String>,

    #[serde(default)]
    pub ports: Vec<ServicePort>,

    /// Externally visible load-balancer status.
    #[serde(default)]
    pub ingress: Vec<IngressStatus>,

    #[serde(default)]
    pub resource_version: u64,
}

impl Service {
    /// Creates a load-balancer service without annotations or status.
    pub fn load_balancer(id: ServiceIdentifier, ports: Vec<ServicePort>) -> Self {
        Self {
            id,
            service_type: ServiceType::LoadBalancer,
            annotations: BTreeMap::new(),
            ports,
            ingress: Vec::new(),
            resource_version: 0,
        }
    }

    /// Returns the annotation value for `key`, if set.
    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(String::as_str)
    }

    /// Returns the transport ports this service requests.
    pub fn l4_ports(&self) -> Vec<L4Port> {
        self.ports
            .iter()
            .map(|p| L4Port {
                protocol: p.protocol,
                port: p.port,
            })
            .collect()
    }

    /// Returns true if any load-balancer status is published.
    pub fn has_ingress(&self) -> bool {
        !self.ingress.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_l4_ports_drop_node_ports() {
        let svc = Service::load_balancer(
            ServiceIdentifier::new("ns", "web"),
            vec![
                ServicePort {
                    protocol: Protocol::Tcp,
                    port: 80,
                    node_port: Some(30080),
                },
                ServicePort {
                    protocol: Protocol::Udp,
                    port: 53,
                    node_port: None,
                },
            ],
        );

        assert_eq!(svc.l4_ports(), vec![L4Port::tcp(80), L4Port::udp(53)]);
        assert!(!svc.has_ingress());
        assert_eq!(svc.annotation("missing"), None);
    }
}
