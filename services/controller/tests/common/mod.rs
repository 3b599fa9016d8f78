#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lbaas_controller::annotations;
use lbaas_controller::worker::{Collaborators, Worker};
use lbaas_controller::{
    ConfigPusher, Job, MemoryClusterStore, NodePortModelGenerator, PortAllocator, PushError,
};
use lbaas_model::{LoadBalancer, Protocol, Service, ServiceIdentifier, ServicePort};
use lbaas_networking::{Ipv4Prefix, L3PortManager, MemoryL3PortManager};
use lbaas_reconcile::{BackoffPolicy, WorkQueue};

/// Pusher remembering every model it was given.
#[derive(Default)]
pub struct RecordingPusher {
    models: Mutex<Vec<LoadBalancer>>,
    failing: AtomicBool,
}

impl RecordingPusher {
    pub fn models(&self) -> Vec<LoadBalancer> {
        self.models.lock().unwrap().clone()
    }

    pub fn last(&self) -> Option<LoadBalancer> {
        self.models.lock().unwrap().last().cloned()
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl ConfigPusher for RecordingPusher {
    async fn push_config(&self, model: &LoadBalancer) -> Result<(), PushError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(PushError::Agents {
                total: 1,
                failures: vec!["agent unreachable".to_string()],
            });
        }
        self.models.lock().unwrap().push(model.clone());
        Ok(())
    }
}

pub fn memory_backend() -> Arc<MemoryL3PortManager> {
    Arc::new(MemoryL3PortManager::new(
        Ipv4Prefix::from_cidr("203.0.113.0/24").unwrap(),
        Ipv4Prefix::from_cidr("10.0.0.0/24").unwrap(),
    ))
}

pub fn collaborators(
    store: &Arc<MemoryClusterStore>,
    backend: &Arc<MemoryL3PortManager>,
    pusher: &Arc<RecordingPusher>,
) -> Collaborators {
    Collaborators {
        store: store.clone(),
        backend: backend.clone(),
        generator: Arc::new(NodePortModelGenerator::new(store.clone(), backend.clone())),
        pusher: pusher.clone(),
    }
}

pub fn id(name: &str) -> ServiceIdentifier {
    ServiceIdentifier::new("ns", name)
}

pub fn tcp(port: u16, node_port: u16) -> ServicePort {
    ServicePort {
        protocol: Protocol::Tcp,
        port,
        node_port: Some(node_port),
    }
}

pub fn managed(service: Service) -> Service {
    let mut service = service;
    service
        .annotations
        .insert(annotations::MANAGED.to_string(), "true".to_string());
    service
}

/// A worker over in-memory collaborators, driven by hand.
pub struct Harness<B = MemoryL3PortManager> {
    pub store: Arc<MemoryClusterStore>,
    pub backend: Arc<B>,
    pub pusher: Arc<RecordingPusher>,
    pub worker: Worker,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_backend(memory_backend())
    }
}

impl<B: L3PortManager + 'static> Harness<B> {
    pub fn with_backend(backend: Arc<B>) -> Self {
        let store = Arc::new(MemoryClusterStore::new());
        store.set_node_addresses(vec!["192.168.0.1".to_string()]);
        let pusher = Arc::new(RecordingPusher::default());

        let queue = WorkQueue::new(
            "test",
            BackoffPolicy::new(Duration::from_millis(1), Duration::from_millis(10)),
        );
        let collaborators = Collaborators {
            store: store.clone(),
            backend: backend.clone(),
            generator: Arc::new(NodePortModelGenerator::new(store.clone(), backend.clone())),
            pusher: pusher.clone(),
        };
        let worker = Worker::new(PortAllocator::new(backend.clone()), collaborators, queue);

        Self {
            store,
            backend,
            pusher,
            worker,
        }
    }

    pub fn enqueue(&self, job: Job) {
        self.worker.queue().add(job);
    }

    /// Run one sync of the service and everything it enqueued.
    pub async fn sync(&mut self, id: &ServiceIdentifier) {
        self.enqueue(Job::SyncService(id.clone()));
        self.worker.run_until_idle().await;
    }

    /// Sync the service until it stops changing, as the change
    /// notifications of a real cluster would.
    pub async fn converge(&mut self, id: &ServiceIdentifier) {
        for _ in 0..10 {
            let before = self.store.service(id).map(|s| s.resource_version);
            self.sync(id).await;
            let after = self.store.service(id).map(|s| s.resource_version);
            if before == after {
                return;
            }
        }
        panic!("service {id} did not converge");
    }
}
