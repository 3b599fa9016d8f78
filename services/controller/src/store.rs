//! Cluster object store.
//!
//! The controller reads services from a cache, writes annotations and status
//! back to the authoritative store, and records service events.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use lbaas_model::{Service, ServiceIdentifier};
use thiserror::Error;
use tracing::info;

/// Errors returned by the cluster store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("service {0} not found")]
    NotFound(ServiceIdentifier),

    /// The update was based on a stale version of the object.
    #[error("conflicting update of service {id}: expected version {expected}, got {actual}")]
    Conflict {
        id: ServiceIdentifier,
        expected: u64,
        actual: u64,
    },

    #[error("cluster store error: {0}")]
    Backend(String),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict { .. })
    }
}

/// An observable transition of a managed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceEvent {
    TakenOver,
    Released,
    Mapped { port_id: String },
    Remapped { from: String, to: String },
    Assigned { ip: String },
    UnassignedForRemapping,
    UnassignedStale,
    UnassignedForRelease,
    Unmapped,
}

impl ServiceEvent {
    /// Short machine-readable reason.
    pub fn reason(&self) -> &'static str {
        match self {
            ServiceEvent::TakenOver => "TakenOver",
            ServiceEvent::Released => "Released",
            ServiceEvent::Mapped { .. } => "Mapped",
            ServiceEvent::Remapped { .. } => "Remapped",
            ServiceEvent::Assigned { .. } => "Assigned",
            ServiceEvent::UnassignedForRemapping => "UnassignedForRemapping",
            ServiceEvent::UnassignedStale | ServiceEvent::UnassignedForRelease => "UnassignedStale",
            ServiceEvent::Unmapped => "Unmapped",
        }
    }
}

impl fmt::Display for ServiceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceEvent::TakenOver => {
                f.write_str("service taken over by the load-balancer controller")
            }
            ServiceEvent::Released => {
                f.write_str("service released by the load-balancer controller")
            }
            ServiceEvent::Mapped { port_id } => write!(f, "service mapped to port {port_id:?}"),
            ServiceEvent::Remapped { from, to } => {
                write!(
                    f,
                    "service mapping changed from port {from:?} to {to:?} (due to conflict)"
                )
            }
            ServiceEvent::Assigned { ip } => {
                write!(f, "service was assigned to the external IP address {ip:?}")
            }
            ServiceEvent::UnassignedForRemapping => {
                f.write_str("service was unassigned due to upcoming port remapping")
            }
            ServiceEvent::UnassignedStale => f.write_str("cleared stale IP address information"),
            ServiceEvent::UnassignedForRelease => {
                f.write_str(
                    "cleared IP address information because control over the service is \
                     released",
                )
            }
            ServiceEvent::Unmapped => f.write_str("service unmapped"),
        }
    }
}

/// Access to cluster service objects.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Read a service from the cache. `Ok(None)` if it does not exist.
    async fn get_service(&self, id: &ServiceIdentifier) -> Result<Option<Service>, StoreError>;

    /// Persist the annotations and spec of a service.
    ///
    /// Fails with [`StoreError::Conflict`] if `service.resource_version` is stale.
    async fn update_service(&self, service: &Service) -> Result<Service, StoreError>;

    /// Persist the load-balancer status of a service.
    async fn update_service_status(&self, service: &Service) -> Result<Service, StoreError>;

    /// Internal addresses of every cluster node.
    async fn node_internal_addresses(&self) -> Result<Vec<String>, StoreError>;

    /// Record an event on a service. Best effort.
    fn record_event(&self, id: &ServiceIdentifier, event: ServiceEvent);
}

#[derive(Debug, Default)]
struct StoreState {
    services: BTreeMap<ServiceIdentifier, Service>,
    nodes: Vec<String>,
    events: Vec<(ServiceIdentifier, ServiceEvent)>,
    failing: bool,
}

/// Cluster store held in memory.
#[derive(Debug, Default)]
pub struct MemoryClusterStore {
    state: Mutex<StoreState>,
}

impl MemoryClusterStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a service, as a user would. Returns the stored object.
    pub fn put_service(&self, mut service: Service) -> Service {
        let mut state = self.state();
        let version = state
            .services
            .get(&service.id)
            .map_or(0, |existing| existing.resource_version);
        service.resource_version = version + 1;
        state.services.insert(service.id.clone(), service.clone());
        service
    }

    pub fn delete_service(&self, id: &ServiceIdentifier) -> Option<Service> {
        self.state().services.remove(id)
    }

    pub fn service(&self, id: &ServiceIdentifier) -> Option<Service> {
        self.state().services.get(id).cloned()
    }

    pub fn set_node_addresses(&self, addresses: Vec<String>) {
        self.state().nodes = addresses;
    }

    /// Make every write fail with [`StoreError::Backend`].
    pub fn set_failing(&self, failing: bool) {
        self.state().failing = failing;
    }

    /// Every recorded event, in order.
    pub fn events(&self) -> Vec<(ServiceIdentifier, ServiceEvent)> {
        self.state().events.clone()
    }

    /// Events recorded on one service, in order.
    pub fn events_for(&self, id: &ServiceIdentifier) -> Vec<ServiceEvent> {
        self.state()
            .events
            .iter()
            .filter(|(owner, _)| owner == id)
            .map(|(_, event)| event.clone())
            .collect()
    }

    fn write<F>(&self, service: &Service, apply: F) -> Result<Service, StoreError>
    where
        F: FnOnce(&mut Service),
    {
        let mut state = self.state();
        if state.failing {
            return Err(StoreError::Backend("store is failing writes".to_string()));
        }

        let stored = state
            .services
            .get_mut(&service.id)
            .ok_or_else(|| StoreError::NotFound(service.id.clone()))?;
        if stored.resource_version != service.resource_version {
            return Err(StoreError::Conflict {
                id: service.id.clone(),
                expected: stored.resource_version,
                actual: service.resource_version,
            });
        }

        apply(stored);
        stored.resource_version += 1;
        Ok(stored.clone())
    }
}

#[async_trait]
impl ClusterStore for MemoryClusterStore {
    async fn get_service(&self, id: &ServiceIdentifier) -> Result<Option<Service>, StoreError> {
        Ok(self.service(id))
    }

    async fn update_service(&self, service: &Service) -> Result<Service, StoreError> {
        self.write(service, |stored| {
            stored.service_type = service.service_type;
            stored.annotations = service.annotations.clone();
            stored.ports = service.ports.clone();
        })
    }

    async fn update_service_status(&self, service: &Service) -> Result<Service, StoreError> {
        self.write(service, |stored| stored.ingress = service.ingress.clone())
    }

    async fn node_internal_addresses(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.state().nodes.clone())
    }

    fn record_event(&self, id: &ServiceIdentifier, event: ServiceEvent) {
        info!(service = %id, reason = event.reason(), "{event}");
        self.state().events.push((id.clone(), event));
    }
}
