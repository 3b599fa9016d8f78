//! Two-phase commit of a service's port mapping.
//!
//! The bound-port annotation and the published load-balancer status are
//! written in separate updates. A port change is only committed to the
//! annotation once no status is published anymore, so the status never
//! points at a port the service is not bound to.

use lbaas_model::{IngressStatus, Service};
use lbaas_networking::ExternalAddress;

use super::{JobError, Worker};
use crate::annotations;
use crate::store::ServiceEvent;

/// What to do once the allocator resolved a port for a managed service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// The resolved port is the bound one.
    Unchanged,

    /// Record the resolved port on the service. `previous` is the port it
    /// was bound to before, if any.
    Commit { previous: Option<String> },

    /// The port changes while a status is published: withdraw the status
    /// first. The annotation follows on the next sync.
    ClearStatusBeforeRemap,
}

impl Transition {
    pub fn decide(bound: Option<&str>, has_status: bool, resolved: &str) -> Self {
        if bound == Some(resolved) {
            Transition::Unchanged
        } else if has_status {
            Transition::ClearStatusBeforeRemap
        } else {
            Transition::Commit {
                previous: bound.map(str::to_string),
            }
        }
    }
}

/// A status published without a bound port is stale and must be cleared
/// before mapping.
pub fn has_stale_status(bound: Option<&str>, has_status: bool) -> bool {
    bound.is_none() && has_status
}

/// Returns true if `ingress` is exactly the single entry for `address`.
pub fn status_matches(ingress: &[IngressStatus], address: &ExternalAddress) -> bool {
    matches!(ingress, [only] if only.ip == address.ip && only.hostname == address.hostname)
}

impl Worker {
    /// Map a managed service and commit the result.
    ///
    /// Returns true if an update was persisted; the caller stops there and
    /// waits for the resulting change notification.
    pub(super) async fn map_service(&mut self, service: &Service) -> Result<bool, JobError> {
        let bound = annotations::bound_port(service);
        let has_status = service.has_ingress();

        if has_stale_status(bound, has_status) {
            self.clear_status(service, ServiceEvent::UnassignedStale).await?;
            return Ok(true);
        }

        let resolved = self
            .allocator
            .map_service(&service.id, &service.l4_ports(), bound)
            .await?;

        match Transition::decide(bound, has_status, &resolved) {
            Transition::Unchanged => Ok(false),
            Transition::Commit { previous } => {
                let mut updated = service.clone();
                annotations::set_bound_port(&mut updated, &resolved);
                self.store.update_service(&updated).await?;

                let event = match previous {
                    None => ServiceEvent::Mapped { port_id: resolved },
                    Some(from) => ServiceEvent::Remapped { from, to: resolved },
                };
                self.store.record_event(&service.id, event);
                Ok(true)
            }
            Transition::ClearStatusBeforeRemap => {
                self.clear_status(service, ServiceEvent::UnassignedForRemapping).await?;
                Ok(true)
            }
        }
    }

    /// Publish the external address of the service's port as its status.
    ///
    /// Returns true if the status changed.
    pub(super) async fn update_status(&mut self, service: &Service) -> Result<bool, JobError> {
        let port_id = self.allocator.get_service_l3_port(&service.id)?;
        let address = self.backend.get_external_address(&port_id).await?;

        if status_matches(&service.ingress, &address) {
            return Ok(false);
        }

        let mut updated = service.clone();
        updated.ingress = vec![IngressStatus {
            ip: address.ip.clone(),
            hostname: address.hostname,
        }];
        self.store.update_service_status(&updated).await?;
        self.store
            .record_event(&service.id, ServiceEvent::Assigned { ip: address.ip });
        Ok(true)
    }

    pub(super) async fn clear_status(
        &mut self,
        service: &Service,
        event: ServiceEvent,
    ) -> Result<(), JobError> {
        let mut updated = service.clone();
        updated.ingress.clear();
        self.store.update_service_status(&updated).await?;
        self.store.record_event(&service.id, event);
        Ok(())
    }
}
