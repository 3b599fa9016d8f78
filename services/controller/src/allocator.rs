//! Port allocator.
//!
//! Bookkeeping of which service is bound to which L3 port and which port
//! numbers it occupies there. The allocator has no internal locking; it is
//! owned by the worker and mutated only from the worker loop.

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

use lbaas_model::{L3Port, L4Port, ServiceIdentifier, ServiceModel};
use lbaas_networking::{L3PortManager, PortManagerError};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Errors returned by the allocator.
#[derive(Debug, Error)]
pub enum AllocatorError {
    /// The service has no recorded mapping.
    #[error("service {0} is not mapped")]
    NotMapped(ServiceIdentifier),

    /// No tracked port fits and the backend cannot provision another one.
    #[error("no suitable L3 port available")]
    NoSuitablePort,

    #[error("L3 port backend error: {0}")]
    Backend(#[from] PortManagerError),
}

/// Maps services onto L3 ports without port-number collisions.
pub struct PortAllocator {
    backend: Arc<dyn L3PortManager>,
    services: BTreeMap<ServiceIdentifier, ServiceModel>,
    l3ports: BTreeMap<String, L3Port>,
}

impl PortAllocator {
    pub fn new(backend: Arc<dyn L3PortManager>) -> Self {
        Self {
            backend,
            services: BTreeMap::new(),
            l3ports: BTreeMap::new(),
        }
    }

    /// Start tracking the given ports. Already tracked ports are left untouched.
    pub fn track_l3_ports<I, S>(&mut self, port_ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for port_id in port_ids {
            self.l3ports.entry(port_id.into()).or_default();
        }
    }

    /// Bind a service to an L3 port which can hold all of `ports`.
    ///
    /// The service's current port is kept if it still exists and has no
    /// conflicting allocation. Otherwise `preferred` (the port recorded on the
    /// service object) is tried, then every tracked port in ascending ID order,
    /// and finally a new port is provisioned.
    ///
    /// On error no service record has been changed.
    pub async fn map_service(
        &mut self,
        id: &ServiceIdentifier,
        ports: &[L4Port],
        preferred: Option<&str>,
    ) -> Result<String, AllocatorError> {
        let candidate = match self.services.get(id) {
            Some(model) => Some(model.l3_port_id.clone()),
            None => preferred.filter(|p| !p.is_empty()).map(str::to_string),
        };

        let mut rejected = None;
        let mut resolved = None;
        if let Some(candidate) = candidate {
            if self.accept_candidate(id, ports, &candidate).await? {
                resolved = Some(candidate);
            } else {
                rejected = Some(candidate);
            }
        }

        let port_id = match resolved {
            Some(port_id) => port_id,
            None => match self.find_l3_port_for(ports, rejected.as_deref()) {
                Some(port_id) => port_id,
                None => self.provision().await?,
            },
        };

        if self.services.contains_key(id) {
            debug!(service = %id, "unmapping service before remap");
            self.unmap_service(id);
            assert!(
                self.l3ports
                    .values()
                    .all(|l3| l3.allocations.values().all(|owner| owner != id)),
                "allocations of {id} survived unmapping"
            );
        }

        let l3port = self.l3ports.entry(port_id.clone()).or_default();
        for l4 in ports {
            debug!(service = %id, port = %l4, l3_port = %port_id, "allocating port");
            l3port.allocations.insert(l4.port, id.clone());
        }
        self.services.insert(
            id.clone(),
            ServiceModel {
                l3_port_id: port_id.clone(),
                ports: ports.to_vec(),
            },
        );

        Ok(port_id)
    }

    async fn accept_candidate(
        &mut self,
        id: &ServiceIdentifier,
        ports: &[L4Port],
        candidate: &str,
    ) -> Result<bool, AllocatorError> {
        if !self.backend.check_port_exists(candidate).await? {
            warn!(
                service = %id,
                l3_port = %candidate,
                "relocating service because its port no longer exists"
            );
            return Ok(false);
        }

        match self.l3ports.get(candidate) {
            Some(l3port) if !l3port.is_suitable_for(ports, Some(id)) => {
                warn!(
                    service = %id,
                    l3_port = %candidate,
                    "relocating service due to port conflict"
                );
                Ok(false)
            }
            Some(_) => Ok(true),
            None => {
                debug!(l3_port = %candidate, "adopting untracked port");
                self.l3ports.insert(candidate.to_string(), L3Port::new());
                Ok(true)
            }
        }
    }

    fn find_l3_port_for(&self, ports: &[L4Port], skip: Option<&str>) -> Option<String> {
        self.l3ports
            .iter()
            .filter(|(port_id, _)| Some(port_id.as_str()) != skip)
            .find(|(_, l3port)| l3port.is_suitable_for(ports, None))
            .map(|(port_id, _)| port_id.clone())
    }

    async fn provision(&mut self) -> Result<String, AllocatorError> {
        let port_id = self.backend.provision_port().await.map_err(|e| {
            if e.is_exhausted() {
                AllocatorError::NoSuitablePort
            } else {
                AllocatorError::Backend(e)
            }
        })?;
        info!(l3_port = %port_id, "created new L3 port");
        self.l3ports.insert(port_id.clone(), L3Port::new());
        Ok(port_id)
    }

    /// Remove the service's record and every allocation it holds.
    ///
    /// Unmapping an unmapped service is a no-op.
    pub fn unmap_service(&mut self, id: &ServiceIdentifier) {
        self.services.remove(id);
        for l3port in self.l3ports.values_mut() {
            l3port.release(id);
        }
    }

    /// Return the ID of the port the service is bound to.
    pub fn get_service_l3_port(&self, id: &ServiceIdentifier) -> Result<String, AllocatorError> {
        self.services
            .get(id)
            .map(|model| model.l3_port_id.clone())
            .ok_or_else(|| AllocatorError::NotMapped(id.clone()))
    }

    /// Snapshot of every mapping: service -> L3 port ID.
    pub fn get_model(&self) -> BTreeMap<ServiceIdentifier, String> {
        self.services
            .iter()
            .map(|(id, model)| (id.clone(), model.l3_port_id.clone()))
            .collect()
    }

    /// Return the IDs of the ports with at least one allocation.
    ///
    /// Tracked ports without allocations are dropped.
    pub fn get_used_l3_ports(&mut self) -> Vec<String> {
        self.l3ports.retain(|_, l3port| !l3port.is_empty());
        self.l3ports.keys().cloned().collect()
    }

    /// Like [`get_used_l3_ports`](Self::get_used_l3_ports), without pruning.
    pub fn used_l3_ports(&self) -> Vec<String> {
        self.l3ports
            .iter()
            .filter(|(_, l3port)| !l3port.is_empty())
            .map(|(port_id, _)| port_id.clone())
            .collect()
    }

    /// Replace the set of ports known to exist.
    ///
    /// Every tracked port not in `port_ids` is dropped, and every service bound
    /// to it is unmapped. Returns the evicted services, each once.
    pub fn set_available_l3_ports(&mut self, port_ids: &[String]) -> Vec<ServiceIdentifier> {
        let available: HashSet<&str> = port_ids.iter().map(String::as_str).collect();
        let gone: Vec<String> = self
            .l3ports
            .keys()
            .filter(|port_id| !available.contains(port_id.as_str()))
            .cloned()
            .collect();

        let mut evicted = BTreeSet::new();
        for port_id in gone {
            let Some(l3port) = self.l3ports.remove(&port_id) else {
                continue;
            };
            info!(
                l3_port = %port_id,
                allocations = l3port.allocations.len(),
                "port is no longer available, evicting services"
            );
            for owner in l3port.allocations.into_values() {
                if self.services.remove(&owner).is_some() {
                    evicted.insert(owner);
                }
            }
        }

        evicted.into_iter().collect()
    }

    /// Number of tracked ports, used or not.
    pub fn tracked_l3_ports(&self) -> usize {
        self.l3ports.len()
    }

    /// Port numbers occupied on an L3 port, with their owners.
    pub fn allocations(&self, port_id: &str) -> Option<&BTreeMap<u16, ServiceIdentifier>> {
        self.l3ports.get(port_id).map(|l3port| &l3port.allocations)
    }
}

#[cfg(test)]
mod tests {
    use lbaas_networking::{Ipv4Prefix, MemoryL3PortManager};

    use super::*;

    fn backend() -> Arc<MemoryL3PortManager> {
        Arc::new(MemoryL3PortManager::new(
            Ipv4Prefix::from_cidr("203.0.113.0/24").unwrap(),
            Ipv4Prefix::from_cidr("10.0.0.0/24").unwrap(),
        ))
    }

    fn svc(name: &str) -> ServiceIdentifier {
        ServiceIdentifier::new("ns", name)
    }

    #[tokio::test]
    async fn test_get_service_l3_port_not_mapped() {
        let allocator = PortAllocator::new(backend());
        assert!(matches!(
            allocator.get_service_l3_port(&svc("a")),
            Err(AllocatorError::NotMapped(_))
        ));
    }

    #[tokio::test]
    async fn test_preferred_port_is_adopted() {
        let backend = backend();
        let existing = backend.provision_port().await.unwrap();
        let mut allocator = PortAllocator::new(backend.clone());

        let port = allocator
            .map_service(&svc("a"), &[L4Port::tcp(80)], Some(&existing))
            .await
            .unwrap();
        assert_eq!(port, existing);
        assert_eq!(allocator.tracked_l3_ports(), 1);
    }

    #[tokio::test]
    async fn test_missing_preferred_port_is_ignored() {
        let backend = backend();
        let mut allocator = PortAllocator::new(backend.clone());

        let port = allocator
            .map_service(&svc("a"), &[L4Port::tcp(80)], Some("port-404"))
            .await
            .unwrap();
        assert_eq!(port, "port-1");
    }

    #[tokio::test]
    async fn test_provision_failure_leaves_service_unmapped() {
        let backend = backend();
        let mut allocator = PortAllocator::new(backend.clone());
        backend.set_unavailable(true);

        let err = allocator
            .map_service(&svc("a"), &[L4Port::tcp(80)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocatorError::Backend(_)));
        assert!(allocator.get_model().is_empty());
    }

    #[tokio::test]
    async fn test_exhausted_backend_reports_no_suitable_port() {
        let backend = Arc::new(
            MemoryL3PortManager::new(
                Ipv4Prefix::from_cidr("203.0.113.0/24").unwrap(),
                Ipv4Prefix::from_cidr("10.0.0.0/24").unwrap(),
            )
            .with_capacity(1),
        );
        let mut allocator = PortAllocator::new(backend);

        allocator
            .map_service(&svc("a"), &[L4Port::tcp(80)], None)
            .await
            .unwrap();
        let err = allocator
            .map_service(&svc("b"), &[L4Port::tcp(80)], None)
            .await
            .unwrap_err();
        assert!(matches!(err, AllocatorError::NoSuitablePort));
    }

    #[tokio::test]
    async fn test_changed_ports_release_old_allocations() {
        let mut allocator = PortAllocator::new(backend());
        let port = allocator
            .map_service(&svc("a"), &[L4Port::tcp(80), L4Port::tcp(443)], None)
            .await
            .unwrap();

        allocator
            .map_service(&svc("a"), &[L4Port::tcp(8080)], None)
            .await
            .unwrap();

        let allocations = allocator.allocations(&port).unwrap();
        assert_eq!(allocations.keys().copied().collect::<Vec<_>>(), vec![8080]);
    }
}
