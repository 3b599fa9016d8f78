//! Controller assembly.
//!
//! Wires the worker to its queue, adopts the ports the backend already has,
//! drives the periodic jobs and hands out producer handles.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use lbaas_model::ServiceIdentifier;
use lbaas_reconcile::WorkQueue;
use tokio::sync::watch;
use tracing::{error, info, instrument, warn};

pub use crate::worker::Collaborators;

use crate::allocator::PortAllocator;
use crate::config::Config;
use crate::generator::NodePortModelGenerator;
use crate::store::ClusterStore;
use crate::worker::{AllocationSnapshot, Job, Worker};

impl Collaborators {
    /// Build the backend, node-port generator and agent pusher from `config`.
    pub fn from_config(config: &Config, store: Arc<dyn ClusterStore>) -> Result<Self> {
        let backend = config.build_port_manager();
        let generator = Arc::new(NodePortModelGenerator::new(
            Arc::clone(&store),
            Arc::clone(&backend),
        ));
        let pusher = Arc::new(config.build_pusher()?);

        Ok(Self {
            store,
            backend,
            generator,
            pusher,
        })
    }
}

/// Producer side of the controller. Cheap to clone.
#[derive(Clone)]
pub struct ControllerHandle {
    queue: WorkQueue<Job>,
    snapshot: watch::Receiver<AllocationSnapshot>,
}

impl ControllerHandle {
    /// A service was added or updated.
    pub fn service_changed(&self, id: ServiceIdentifier) {
        self.queue.add(Job::SyncService(id));
    }

    /// A service was deleted. `annotations` is its last known state.
    pub fn service_deleted(&self, id: ServiceIdentifier, annotations: BTreeMap<String, String>) {
        self.queue.add(Job::RemoveService { id, annotations });
    }

    /// Something the load-balancer model depends on changed (nodes,
    /// endpoints, network policies).
    pub fn aux_changed(&self) {
        self.queue.add(Job::PushConfig);
    }

    pub fn enqueue(&self, job: Job) {
        self.queue.add(job);
    }

    /// The state published after the most recent job.
    pub fn snapshot(&self) -> AllocationSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AllocationSnapshot> {
        self.snapshot.clone()
    }
}

/// Enqueues the barrier removal, then available-port syncs and cleanups.
struct PeriodicJobs {
    queue: WorkQueue<Job>,
    interval: Duration,
}

impl PeriodicJobs {
    #[instrument(skip(self, shutdown))]
    async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Starting periodic jobs"
        );

        let mut interval = tokio::time::interval(self.interval);
        // The first tick completes immediately; the barrier waits a full period.
        interval.tick().await;

        let mut barrier_removed = false;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if barrier_removed {
                        self.queue.add(Job::SyncAvailablePorts);
                        self.queue.add(Job::Cleanup);
                    } else {
                        self.queue.add(Job::RemoveCleanupBarrier);
                        barrier_removed = true;
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("Periodic jobs shutting down");
                        break;
                    }
                }
            }
        }
    }
}

pub struct Controller {
    worker: Worker,
    periodic: PeriodicJobs,
    handle: ControllerHandle,
}

impl Controller {
    /// Create the controller and adopt every port the backend currently offers.
    pub async fn new(config: &Config, collaborators: Collaborators) -> Self {
        let mut allocator = PortAllocator::new(Arc::clone(&collaborators.backend));
        match collaborators.backend.get_available_ports().await {
            Ok(ports) => {
                info!(ports = ports.len(), "adopting available L3 ports");
                allocator.track_l3_ports(ports);
            }
            Err(e) => warn!(error = %e, "could not load available L3 ports"),
        }

        let queue = WorkQueue::new("jobs", config.requeue_backoff.clone());
        let worker = Worker::new(allocator, collaborators, queue.clone());
        let handle = ControllerHandle {
            queue: queue.clone(),
            snapshot: worker.subscribe(),
        };

        Self {
            worker,
            periodic: PeriodicJobs {
                queue,
                interval: config.cleanup_interval,
            },
            handle,
        }
    }

    pub fn handle(&self) -> ControllerHandle {
        self.handle.clone()
    }

    /// Run until shutdown is signaled.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let periodic = self.periodic;
        let periodic_shutdown = shutdown.clone();
        let driver = tokio::spawn(async move { periodic.run(periodic_shutdown).await });

        self.worker.run(shutdown).await;

        if let Err(e) = driver.await {
            error!(error = %e, "periodic job driver failed");
        }
    }
}
