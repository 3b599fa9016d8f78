//! The serial job executor.
//!
//! Exactly one worker drains the job queue. It owns the port allocator and
//! runs each job to completion before taking the next one.

mod jobs;
mod mapping;

use std::collections::BTreeMap;
use std::sync::Arc;

use lbaas_model::ServiceIdentifier;
use lbaas_networking::L3PortManager;
use lbaas_reconcile::{RequeueMode, WorkQueue};
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

pub use jobs::{Job, JobError};
pub use mapping::{has_stale_status, status_matches, Transition};

use crate::agent::ConfigPusher;
use crate::allocator::PortAllocator;
use crate::generator::ModelGenerator;
use crate::store::ClusterStore;

/// External collaborators of the worker.
#[derive(Clone)]
pub struct Collaborators {
    pub store: Arc<dyn ClusterStore>,
    pub backend: Arc<dyn L3PortManager>,
    pub generator: Arc<dyn ModelGenerator>,
    pub pusher: Arc<dyn ConfigPusher>,
}

/// Read-only view of the allocator, published after every job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllocationSnapshot {
    /// Service -> L3 port ID.
    pub assignments: BTreeMap<ServiceIdentifier, String>,

    /// Ports with at least one allocation.
    pub used_l3_ports: Vec<String>,

    pub cleanups_allowed: bool,
}

pub struct Worker {
    allocator: PortAllocator,
    store: Arc<dyn ClusterStore>,
    backend: Arc<dyn L3PortManager>,
    generator: Arc<dyn ModelGenerator>,
    pusher: Arc<dyn ConfigPusher>,
    queue: WorkQueue<Job>,
    allow_cleanups: bool,
    snapshot: watch::Sender<AllocationSnapshot>,
}

impl Worker {
    pub fn new(
        allocator: PortAllocator,
        collaborators: Collaborators,
        queue: WorkQueue<Job>,
    ) -> Self {
        let (snapshot, _) = watch::channel(AllocationSnapshot::default());
        let worker = Self {
            allocator,
            store: collaborators.store,
            backend: collaborators.backend,
            generator: collaborators.generator,
            pusher: collaborators.pusher,
            queue,
            allow_cleanups: false,
            snapshot,
        };
        worker.publish_snapshot();
        worker
    }

    pub fn queue(&self) -> &WorkQueue<Job> {
        &self.queue
    }

    pub fn allocator(&self) -> &PortAllocator {
        &self.allocator
    }

    pub fn cleanups_allowed(&self) -> bool {
        self.allow_cleanups
    }

    /// Subscribe to the snapshots published after every job.
    pub fn subscribe(&self) -> watch::Receiver<AllocationSnapshot> {
        self.snapshot.subscribe()
    }

    fn publish_snapshot(&self) {
        self.snapshot.send_replace(AllocationSnapshot {
            assignments: self.allocator.get_model(),
            used_l3_ports: self.allocator.used_l3_ports(),
            cleanups_allowed: self.allow_cleanups,
        });
    }

    /// Run one job and apply its requeue decision.
    #[instrument(skip(self, job), fields(job = %job))]
    async fn execute(&mut self, job: Job) {
        match job.run(self).await {
            Ok(RequeueMode::Drop) => {
                self.queue.forget(&job);
                debug!("job succeeded");
            }
            Ok(RequeueMode::RequeueTail) => {
                debug!("job asked to be requeued");
                self.queue.add_rate_limited(job.clone());
            }
            Err(e) => match job.failure_policy() {
                RequeueMode::RequeueTail => {
                    let attempts = self.queue.num_requeues(&job) + 1;
                    if e.is_barrier_active() {
                        debug!(attempts, "cleanup deferred until the barrier is removed");
                    } else {
                        warn!(error = %e, attempts, "job failed; requeueing");
                    }
                    self.queue.add_rate_limited(job.clone());
                }
                RequeueMode::Drop => {
                    error!(error = %e, "job failed; dropping");
                    self.queue.forget(&job);
                }
            },
        }

        self.queue.done(&job);
        self.publish_snapshot();
    }

    /// Take the next visible job and run it. Returns false if none is visible.
    pub async fn process_next(&mut self) -> bool {
        if self.queue.is_empty() {
            return false;
        }
        match self.queue.get().await {
            Some(job) => {
                self.execute(job).await;
                true
            }
            None => false,
        }
    }

    /// Run jobs until no job is visible. Jobs waiting for their backoff
    /// delay are not waited for.
    pub async fn run_until_idle(&mut self) -> usize {
        let mut executed = 0;
        while self.process_next().await {
            executed += 1;
        }
        executed
    }

    /// Run jobs until shutdown is signaled, then drain the visible jobs.
    #[instrument(skip_all, fields(queue = %self.queue.name()))]
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("worker started");

        loop {
            tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("worker shutting down");
                        break;
                    }
                }
                job = self.queue.get() => match job {
                    Some(job) => self.execute(job).await,
                    None => break,
                },
            }
        }

        self.queue.shut_down();
        let drained = self.run_until_idle().await;
        info!(drained, "worker stopped");
    }
}
