//! Identifier and port bookkeeping types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ModelError;

// =============================================================================
// Service Identifier
// =============================================================================

/// Stable key of a service across its lifetime.
///
/// The canonical string form is `namespace/name`. Parsing splits on the first
/// `/`, so the name part may itself contain slashes.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ServiceIdentifier {
    pub namespace: String,
    pub name: String,
}

impl ServiceIdentifier {
    /// Creates an identifier from its parts.
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parses an identifier from its `namespace/name` key.
    pub fn from_key(key: &str) -> Result<Self, ModelError> {
        let Some((namespace, name)) = key.split_once('/') else {
            return Err(ModelError::InvalidKey(key.to_string()));
        };

        if namespace.is_empty() {
            return Err(ModelError::EmptyKeyPart {
                part: "namespace",
                key: key.to_string(),
            });
        }
        if name.is_empty() {
            return Err(ModelError::EmptyKeyPart {
                part: "name",
                key: key.to_string(),
            });
        }

        Ok(Self::new(namespace, name))
    }

    /// Returns the `namespace/name` key.
    pub fn to_key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

impl fmt::Display for ServiceIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}

impl FromStr for ServiceIdentifier {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_key(s)
    }
}

impl Serialize for ServiceIdentifier {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_key())
    }
}

impl<'de> Deserialize<'de> for ServiceIdentifier {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Self::from_key(&s).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// Ports
// =============================================================================

/// Transport protocol of an exposed port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Protocol {
    Tcp,
    Udp,
    Sctp,
}

impl Protocol {
    /// Returns the canonical upper-case name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Protocol::Tcp => "TCP",
            Protocol::Udp => "UDP",
            Protocol::Sctp => "SCTP",
        }
    }
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Protocol {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TCP" => Ok(Protocol::Tcp),
            "UDP" => Ok(Protocol::Udp),
            "SCTP" => Ok(Protocol::Sctp),
            _ => Err(ModelError::UnknownProtocol(s.to_string())),
        }
    }
}

/// A transport port a service wants exposed on its L3 port.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct L4Port {
    pub protocol: Protocol,
    pub port: u16,
}

impl L4Port {
    pub fn tcp(port: u16) -> Self {
        Self {
            protocol: Protocol::Tcp,
            port,
        }
    }

    pub fn udp(port: u16) -> Self {
        Self {
            protocol: Protocol::Udp,
            port,
        }
    }
}

impl fmt::Display for L4Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.protocol, self.port)
    }
}

// =============================================================================
// Allocator Records
// =============================================================================

/// The allocator's record for one mapped service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceModel {
    /// ID of the L3 port the service is bound to.
    pub l3_port_id: String,

    /// Transport ports the service occupies on that L3 port.
    pub ports: Vec<L4Port>,
}

/// The allocator's record for one network resource.
///
/// Occupancy is tracked by port number only, so a TCP and a UDP request for
/// the same number conflict.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct L3Port {
    /// Occupied port number -> owning service.
    pub allocations: BTreeMap<u16, ServiceIdentifier>,
}

impl L3Port {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if every requested port is free or already held by `owner`.
    pub fn is_suitable_for(&self, ports: &[L4Port], owner: Option<&ServiceIdentifier>) -> bool {
        ports.iter().all(|l4| match self.allocations.get(&l4.port) {
            None => true,
            Some(existing) => Some(existing) == owner,
        })
    }

    /// Returns true if no port is occupied.
    pub fn is_empty(&self) -> bool {
        self.allocations.is_empty()
    }

    /// Removes every allocation held by `owner`. Returns the number removed.
    pub fn release(&mut self, owner: &ServiceIdentifier) -> usize {
        let before = self.allocations.len();
        self.allocations.retain(|_, user| user != owner);
        before - self.allocations.len()
    }
}
