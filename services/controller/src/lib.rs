//! lbaas controller library.
//!
//! The controller decides which load-balancer service is bound to which L3
//! port and drives that decision to convergence through a single serial
//! worker draining a deduplicating, rate-limited job queue.
//!
//! Producers (cluster watchers) talk to it through a [`ControllerHandle`];
//! the cluster store, the L3 port backend, the model generator and the agent
//! pusher are injected as trait objects.

pub mod agent;
pub mod allocator;
pub mod annotations;
pub mod config;
pub mod controller;
pub mod generator;
pub mod store;
pub mod worker;

pub use agent::{ConfigPusher, HttpAgentPusher, PushError};
pub use allocator::{AllocatorError, PortAllocator};
pub use config::Config;
pub use controller::{Collaborators, Controller, ControllerHandle};
pub use generator::{GeneratorError, ModelGenerator, NodePortModelGenerator};
pub use store::{ClusterStore, MemoryClusterStore, ServiceEvent, StoreError};
pub use worker::{AllocationSnapshot, Job, JobError};
