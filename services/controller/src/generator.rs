//! Load-balancer model generation.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use lbaas_model::{IngressIp, LoadBalancer, PortForward, ServiceIdentifier};
use lbaas_networking::{L3PortManager, PortManagerError};
use thiserror::Error;
use tracing::debug;

use crate::store::{ClusterStore, StoreError};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("cluster store error: {0}")]
    Store(#[from] StoreError),

    #[error("L3 port backend error: {0}")]
    Backend(#[from] PortManagerError),
}

/// Turns the current port assignment into the model pushed to agents.
#[async_trait]
pub trait ModelGenerator: Send + Sync {
    async fn generate_model(
        &self,
        assignment: &BTreeMap<ServiceIdentifier, String>,
    ) -> Result<LoadBalancer, GeneratorError>;
}

/// Forwards every service port to the service's node port on every node.
pub struct NodePortModelGenerator {
    store: Arc<dyn ClusterStore>,
    backend: Arc<dyn L3PortManager>,
}

impl NodePortModelGenerator {
    pub fn new(store: Arc<dyn ClusterStore>, backend: Arc<dyn L3PortManager>) -> Self {
        Self { store, backend }
    }
}

#[async_trait]
impl ModelGenerator for NodePortModelGenerator {
    async fn generate_model(
        &self,
        assignment: &BTreeMap<ServiceIdentifier, String>,
    ) -> Result<LoadBalancer, GeneratorError> {
        let mut nodes = self.store.node_internal_addresses().await?;
        nodes.sort();
        nodes.dedup();

        let mut by_port: BTreeMap<&str, Vec<&ServiceIdentifier>> = BTreeMap::new();
        for (id, port_id) in assignment {
            by_port.entry(port_id.as_str()).or_default().push(id);
        }

        let mut model = LoadBalancer::default();
        for (port_id, services) in by_port {
            let address = self.backend.get_internal_address(port_id).await?;
            let mut forwards = Vec::new();

            for id in services {
                // Deleted after it was mapped; its removal job will follow.
                let Some(service) = self.store.get_service(id).await? else {
                    debug!(service = %id, "skipping service missing from the cache");
                    continue;
                };

                for port in &service.ports {
                    let Some(node_port) = port.node_port else {
                        continue;
                    };
                    forwards.push(PortForward {
                        protocol: port.protocol,
                        inbound_port: port.port,
                        destination_addresses: nodes.clone(),
                        destination_port: node_port,
                        balance_policy: String::new(),
                    });
                }
            }

            forwards.sort_by_key(|f| (f.inbound_port, f.protocol));
            model.ingress.push(IngressIp {
                address,
                ports: forwards,
            });
        }

        Ok(model)
    }
}
