//! Reconciliation jobs.

use std::collections::BTreeMap;
use std::fmt;

use lbaas_model::{Service, ServiceIdentifier};
use lbaas_networking::PortManagerError;
use lbaas_reconcile::RequeueMode;
use thiserror::Error;
use tracing::{debug, info};

use super::Worker;
use crate::agent::PushError;
use crate::allocator::AllocatorError;
use crate::annotations;
use crate::generator::GeneratorError;
use crate::store::{ServiceEvent, StoreError};

/// A unit of work for the worker.
///
/// Jobs carry only what they need to run idempotently; equal jobs collapse
/// into one while pending.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Job {
    /// Bring one service's mapping, annotations and status up to date.
    SyncService(ServiceIdentifier),

    /// Forget a deleted service. `annotations` is its last known state.
    RemoveService {
        id: ServiceIdentifier,
        annotations: BTreeMap<String, String>,
    },

    /// Allow cleanups from now on.
    RemoveCleanupBarrier,

    /// Delete backend ports without allocations.
    Cleanup,

    /// Regenerate the load-balancer model and push it to the agents.
    PushConfig,

    /// Drop ports which vanished from the backend and evict their services.
    /// Ports the backend offers are tracked again.
    SyncAvailablePorts,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::SyncService(id) => write!(f, "SyncService({:?})", id.to_key()),
            Job::RemoveService { id, .. } => write!(f, "RemoveService({:?})", id.to_key()),
            Job::RemoveCleanupBarrier => f.write_str("RemoveCleanupBarrier"),
            Job::Cleanup => f.write_str("Cleanup"),
            Job::PushConfig => f.write_str("PushConfig"),
            Job::SyncAvailablePorts => f.write_str("SyncAvailablePorts"),
        }
    }
}

#[derive(Debug, Error)]
pub enum JobError {
    /// Cleanups are not allowed yet.
    #[error("cleanup barrier is in place")]
    BarrierActive,

    #[error(transparent)]
    Allocator(#[from] AllocatorError),

    #[error("L3 port backend error: {0}")]
    Backend(#[from] PortManagerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("model generation failed: {0}")]
    Generator(#[from] GeneratorError),

    #[error("config push failed: {0}")]
    Push(#[from] PushError),
}

impl JobError {
    pub fn is_barrier_active(&self) -> bool {
        matches!(self, JobError::BarrierActive)
    }
}

impl Job {
    /// What the worker does with this job when it fails.
    pub fn failure_policy(&self) -> RequeueMode {
        RequeueMode::RequeueTail
    }

    pub(super) async fn run(&self, worker: &mut Worker) -> Result<RequeueMode, JobError> {
        match self {
            Job::SyncService(id) => worker.sync_service(id).await,
            Job::RemoveService { id, annotations } => Ok(worker.remove_service(id, annotations)),
            Job::RemoveCleanupBarrier => {
                info!("cleanup barrier removed");
                worker.allow_cleanups = true;
                Ok(RequeueMode::Drop)
            }
            Job::Cleanup => worker.cleanup().await,
            Job::PushConfig => worker.push_config().await,
            Job::SyncAvailablePorts => worker.sync_available_ports().await,
        }
    }
}

impl Worker {
    async fn sync_service(&mut self, id: &ServiceIdentifier) -> Result<RequeueMode, JobError> {
        let Some(service) = self.store.get_service(id).await? else {
            debug!(service = %id, "service is gone");
            return Ok(RequeueMode::Drop);
        };

        let is_managed = annotations::is_managed(&service.annotations);
        let can_manage = annotations::can_manage(&service);

        match (can_manage, is_managed) {
            (false, false) => {}
            (false, true) => self.release(&service).await?,
            (true, false) => self.take_over(&service).await?,
            (true, true) => {
                if self.map_service(&service).await? {
                    return Ok(RequeueMode::Drop);
                }
                self.update_status(&service).await?;
                self.queue.add(Job::PushConfig);
            }
        }

        Ok(RequeueMode::Drop)
    }

    async fn take_over(&mut self, service: &Service) -> Result<(), JobError> {
        info!(service = %service.id, "taking over service");

        let mut updated = service.clone();
        updated
            .annotations
            .insert(annotations::MANAGED.to_string(), "true".to_string());
        self.store.update_service(&updated).await?;
        self.store.record_event(&service.id, ServiceEvent::TakenOver);
        Ok(())
    }

    /// Give up control over a service.
    ///
    /// A published status is withdrawn first; the rest happens on the next sync.
    async fn release(&mut self, service: &Service) -> Result<(), JobError> {
        if service.has_ingress() {
            return self
                .clear_status(service, ServiceEvent::UnassignedForRelease)
                .await;
        }

        info!(service = %service.id, "releasing service");

        let had_port = annotations::bound_port(service).is_some();
        self.allocator.unmap_service(&service.id);
        if had_port {
            self.store.record_event(&service.id, ServiceEvent::Unmapped);
        }

        let mut updated = service.clone();
        annotations::clear(&mut updated);
        self.store.update_service(&updated).await?;
        self.store.record_event(&service.id, ServiceEvent::Released);

        self.queue.add(Job::PushConfig);
        Ok(())
    }

    fn remove_service(
        &mut self,
        id: &ServiceIdentifier,
        last_known: &BTreeMap<String, String>,
    ) -> RequeueMode {
        if !annotations::is_managed(last_known) {
            return RequeueMode::Drop;
        }

        info!(service = %id, "removing deleted service");
        self.allocator.unmap_service(id);
        self.queue.add(Job::Cleanup);
        self.queue.add(Job::PushConfig);
        RequeueMode::Drop
    }

    async fn cleanup(&mut self) -> Result<RequeueMode, JobError> {
        if !self.allow_cleanups {
            return Err(JobError::BarrierActive);
        }

        let used = self.allocator.get_used_l3_ports();
        debug!(used = used.len(), "cleaning unused L3 ports");
        self.backend.clean_unused_ports(&used).await?;

        // Ports the backend keeps despite being unused stay allocatable.
        let remaining = self.backend.get_available_ports().await?;
        self.allocator.track_l3_ports(remaining);
        Ok(RequeueMode::Drop)
    }

    async fn push_config(&mut self) -> Result<RequeueMode, JobError> {
        let assignment = self.allocator.get_model();
        let model = self.generator.generate_model(&assignment).await?;
        self.pusher.push_config(&model).await?;

        debug!(
            services = assignment.len(),
            ingress = model.ingress.len(),
            forwards = model.forward_count(),
            "pushed load-balancer config"
        );
        Ok(RequeueMode::Drop)
    }

    async fn sync_available_ports(&mut self) -> Result<RequeueMode, JobError> {
        let available = self.backend.get_available_ports().await?;
        let evicted = self.allocator.set_available_l3_ports(&available);
        self.allocator.track_l3_ports(available);

        if !evicted.is_empty() {
            info!(evicted = evicted.len(), "services evicted from vanished ports");
            for id in evicted {
                self.queue.add(Job::SyncService(id));
            }
            self.queue.add(Job::PushConfig);
        }

        Ok(RequeueMode::Drop)
    }
}
