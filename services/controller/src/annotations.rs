//! Service annotations owned by the controller.
//!
//! Annotations are the controller's only durable state: the allocator is
//! rebuilt from them after a restart.

use std::collections::BTreeMap;

use lbaas_model::{Service, ServiceType};

/// Set to `"true"` once the controller has taken a service over. Set to
/// `"false"` by users to opt a load-balancer service out.
pub const MANAGED: &str = "load-balancer.lbaas.io/managed";

/// ID of the L3 port the service is bound to.
pub const BOUND_PORT: &str = "load-balancer.lbaas.io/bound-port";

/// Returns true if the annotations mark the service as taken over.
pub fn is_managed(annotations: &BTreeMap<String, String>) -> bool {
    annotations.get(MANAGED).map(String::as_str) == Some("true")
}

/// Returns true if the service may be managed by the controller.
pub fn can_manage(service: &Service) -> bool {
    service.service_type == ServiceType::LoadBalancer
        && service.annotation(MANAGED) != Some("false")
}

/// Returns the bound port recorded on the service, if any.
pub fn bound_port(service: &Service) -> Option<&str> {
    service.annotation(BOUND_PORT).filter(|id| !id.is_empty())
}

pub fn set_bound_port(service: &mut Service, port_id: &str) {
    service
        .annotations
        .insert(BOUND_PORT.to_string(), port_id.to_string());
}

/// Removes both controller annotations.
pub fn clear(service: &mut Service) {
    service.annotations.remove(MANAGED);
    service.annotations.remove(BOUND_PORT);
}

#[cfg(test)]
mod tests {
    use lbaas_model::ServiceIdentifier;

    use super::*;

    fn service(service_type: ServiceType, managed: Option<&str>) -> Service {
        let mut svc = Service::load_balancer(ServiceIdentifier::new("ns", "web"), Vec::new());
        svc.service_type = service_type;
        if let Some(value) = managed {
            svc.annotations.insert(MANAGED.to_string(), value.to_string());
        }
        svc
    }

    #[test]
    fn test_can_manage() {
        assert!(can_manage(&service(ServiceType::LoadBalancer, None)));
        assert!(can_manage(&service(ServiceType::LoadBalancer, Some("true"))));
        assert!(can_manage(&service(ServiceType::LoadBalancer, Some("yes"))));
        assert!(!can_manage(&service(ServiceType::LoadBalancer, Some("false"))));
        assert!(!can_manage(&service(ServiceType::NodePort, None)));
    }

    #[test]
    fn test_is_managed_requires_exact_true() {
        assert!(is_managed(&service(ServiceType::NodePort, Some("true")).annotations));
        assert!(!is_managed(&service(ServiceType::LoadBalancer, Some("True")).annotations));
        assert!(!is_managed(&service(ServiceType::LoadBalancer, None).annotations));
    }

    #[test]
    fn test_bound_port_roundtrip() {
        let mut svc = service(ServiceType::LoadBalancer, Some("true"));
        assert_eq!(bound_port(&svc), None);

        set_bound_port(&mut svc, "port-7");
        assert_eq!(bound_port(&svc), Some("port-7"));

        svc.annotations.insert(BOUND_PORT.to_string(), String::new());
        assert_eq!(bound_port(&svc), None);

        clear(&mut svc);
        assert!(svc.annotations.is_empty());
    }
}
