//! Fixed pool of IPv4 addresses.
//!
//! Each configured address is one L3 port; its ID is the address itself.

use std::net::Ipv4Addr;

use async_trait::async_trait;
use tracing::debug;

use crate::{ExternalAddress, L3PortManager, PortManagerError};

/// L3 port backend over a fixed list of addresses.
///
/// It cannot provision new ports and never deletes any.
#[derive(Debug, Clone)]
pub struct StaticL3PortManager {
    addresses: Vec<Ipv4Addr>,
}

impl StaticL3PortManager {
    pub fn new(addresses: Vec<Ipv4Addr>) -> Self {
        Self { addresses }
    }

    pub fn addresses(&self) -> &[Ipv4Addr] {
        &self.addresses
    }

    fn lookup(&self, port_id: &str) -> Option<Ipv4Addr> {
        let addr = port_id.parse::<Ipv4Addr>().ok()?;
        self.addresses.contains(&addr).then_some(addr)
    }

    fn require(&self, port_id: &str) -> Result<Ipv4Addr, PortManagerError> {
        self.lookup(port_id).ok_or_else(|| {
            PortManagerError::NotFound(format!("{port_id} is not a valid load-balancer address"))
        })
    }
}

#[async_trait]
impl L3PortManager for StaticL3PortManager {
    async fn provision_port(&self) -> Result<String, PortManagerError> {
        Err(PortManagerError::PoolExhausted(
            "cannot provision new ports from a static address pool".to_string(),
        ))
    }

    async fn check_port_exists(&self, port_id: &str) -> Result<bool, PortManagerError> {
        Ok(self.lookup(port_id).is_some())
    }

    async fn get_available_ports(&self) -> Result<Vec<String>, PortManagerError> {
        Ok(self.addresses.iter().map(ToString::to_string).collect())
    }

    async fn clean_unused_ports(&self, used_ports: &[String]) -> Result<(), PortManagerError> {
        debug!(used = used_ports.len(), "static pool does not delete ports");
        Ok(())
    }

    async fn get_external_address(
        &self,
        port_id: &str,
    ) -> Result<ExternalAddress, PortManagerError> {
        let addr = self.require(port_id)?;
        Ok(ExternalAddress {
            ip: addr.to_string(),
            hostname: String::new(),
        })
    }

    async fn get_internal_address(&self, port_id: &str) -> Result<String, PortManagerError> {
        Ok(self.require(port_id)?.to_string())
    }
}
