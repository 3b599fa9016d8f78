//! Network resource backends for the load-balancer controller.
//!
//! This library provides:
//! - The [`L3PortManager`] capability through which the controller provisions,
//!   inspects and deletes L3 ports (address-bearing network resources)
//! - [`StaticL3PortManager`], a fixed pool of IPv4 addresses
//! - [`MemoryL3PortManager`], an in-process dynamic pool
//! - IPv4 prefix parsing and sequential address allocation

mod error;
mod ipam;
mod memory;
mod static_pool;

use async_trait::async_trait;

pub use error::PortManagerError;
pub use ipam::{Ipv4Allocator, Ipv4Prefix};
pub use memory::MemoryL3PortManager;
pub use static_pool::StaticL3PortManager;

/// Externally reachable address of an L3 port.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExternalAddress {
    pub ip: String,
    pub hostname: String,
}

/// Backend managing L3 ports.
///
/// Implementations are expected to bound the latency of every call; the
/// controller executes them inline in its single worker loop.
#[async_trait]
pub trait L3PortManager: Send + Sync {
    /// Create a new L3 port and return its ID.
    async fn provision_port(&self) -> Result<String, PortManagerError>;

    /// Check whether the port still exists in the backend.
    async fn check_port_exists(&self, port_id: &str) -> Result<bool, PortManagerError>;

    /// Return the IDs of every port the backend currently offers.
    async fn get_available_ports(&self) -> Result<Vec<String>, PortManagerError>;

    /// Delete every port managed by the backend which is not in `used_ports`.
    async fn clean_unused_ports(&self, used_ports: &[String]) -> Result<(), PortManagerError>;

    /// Return the externally reachable address of a port.
    async fn get_external_address(
        &self,
        port_id: &str,
    ) -> Result<ExternalAddress, PortManagerError>;

    /// Return the internal address of a port (target of the external address).
    async fn get_internal_address(&self, port_id: &str) -> Result<String, PortManagerError>;
}
