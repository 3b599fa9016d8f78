//! # lbaas-model
//!
//! Value types shared by the load-balancer controller.
//!
//! ## Contents
//!
//! - [`ServiceIdentifier`]: the `(namespace, name)` key of a service, with a
//!   canonical `namespace/name` string form used as map key and annotation value
//! - [`L4Port`] and [`Protocol`]: the transport footprint a service requests
//! - [`ServiceModel`] and [`L3Port`]: the allocator's bookkeeping records
//! - [`Service`]: the controller's view of a cluster service object
//! - [`LoadBalancer`]: the forwarding model pushed to edge agents

mod error;
mod loadbalancer;
mod service;
mod types;

pub use error::ModelError;
pub use loadbalancer::{IngressIp, LoadBalancer, PortForward};
pub use service::{IngressStatus, Service, ServicePort, ServiceType};
pub use types::{L3Port, L4Port, Protocol, ServiceIdentifier, ServiceModel};
