//! In-process dynamic L3 port pool.
//!
//! Ports are provisioned on demand with IDs `port-1`, `port-2`, ... and get
//! one external and one internal address each from the configured prefixes.
//! Unused ports are deleted by [`L3PortManager::clean_unused_ports`].

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::net::Ipv4Addr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tracing::{debug, info};

use crate::{ExternalAddress, Ipv4Allocator, Ipv4Prefix, L3PortManager, PortManagerError};

#[derive(Debug, Clone)]
struct PortRecord {
    external: Ipv4Addr,
    internal: Ipv4Addr,
}

#[derive(Debug)]
struct PoolState {
    ports: BTreeMap<String, PortRecord>,
    external: Ipv4Allocator,
    internal: Ipv4Allocator,
    next_id: u64,
    deleted: Vec<String>,
    unavailable: bool,
}

/// Dynamic L3 port backend held in memory.
#[derive(Debug)]
pub struct MemoryL3PortManager {
    capacity: Option<usize>,
    state: Mutex<PoolState>,
}

impl MemoryL3PortManager {
    pub fn new(external: Ipv4Prefix, internal: Ipv4Prefix) -> Self {
        Self {
            capacity: None,
            state: Mutex::new(PoolState {
                ports: BTreeMap::new(),
                external: Ipv4Allocator::new(external),
                internal: Ipv4Allocator::new(internal),
                next_id: 1,
                deleted: Vec::new(),
                unavailable: false,
            }),
        }
    }

    /// Limit the number of ports that may exist at the same time.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = Some(capacity);
        self
    }

    fn state(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Delete a port out-of-band, as an operator would.
    pub fn remove_port(&self, port_id: &str) -> bool {
        self.state().ports.remove(port_id).is_some()
    }

    /// Make every call fail with [`PortManagerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// IDs of the ports that currently exist.
    pub fn ports(&self) -> Vec<String> {
        self.state().ports.keys().cloned().collect()
    }

    /// IDs of the ports deleted by cleanups, in deletion order.
    pub fn deleted(&self) -> Vec<String> {
        self.state().deleted.clone()
    }

    fn check_available(state: &PoolState) -> Result<(), PortManagerError> {
        if state.unavailable {
            return Err(PortManagerError::Unavailable(
                "in-memory port pool is offline".to_string(),
            ));
        }
        Ok(())
    }

    fn record(&self, port_id: &str) -> Result<PortRecord, PortManagerError> {
        let state = self.state();
        Self::check_available(&state)?;
        state
            .ports
            .get(port_id)
            .cloned()
            .ok_or_else(|| PortManagerError::NotFound(port_id.to_string()))
    }
}

#[async_trait]
impl L3PortManager for MemoryL3PortManager {
    async fn provision_port(&self) -> Result<String, PortManagerError> {
        let mut state = self.state();
        Self::check_available(&state)?;

        if let Some(capacity) = self.capacity {
            if state.ports.len() >= capacity {
                return Err(PortManagerError::PoolExhausted(format!(
                    "capacity of {capacity} ports reached"
                )));
            }
        }

        let external = state.external.allocate()?;
        let internal = state.internal.allocate()?;
        let port_id = format!("port-{}", state.next_id);
        state.next_id += 1;

        info!(
            port_id = %port_id,
            external = %external,
            internal = %internal,
            "provisioned L3 port"
        );
        state
            .ports
            .insert(port_id.clone(), PortRecord { external, internal });
        Ok(port_id)
    }

    async fn check_port_exists(&self, port_id: &str) -> Result<bool, PortManagerError> {
        let state = self.state();
        Self::check_available(&state)?;
        Ok(state.ports.contains_key(port_id))
    }

    async fn get_available_ports(&self) -> Result<Vec<String>, PortManagerError> {
        let state = self.state();
        Self::check_available(&state)?;
        Ok(state.ports.keys().cloned().collect())
    }

    async fn clean_unused_ports(&self, used_ports: &[String]) -> Result<(), PortManagerError> {
        let mut state = self.state();
        Self::check_available(&state)?;

        let used: HashSet<&str> = used_ports.iter().map(String::as_str).collect();
        let unused: BTreeSet<String> = state
            .ports
            .keys()
            .filter(|id| !used.contains(id.as_str()))
            .cloned()
            .collect();

        for port_id in unused {
            debug!(port_id = %port_id, "deleting unused L3 port");
            state.ports.remove(&port_id);
            state.deleted.push(port_id);
        }
        Ok(())
    }

    async fn get_external_address(
        &self,
        port_id: &str,
    ) -> Result<ExternalAddress, PortManagerError> {
        let record = self.record(port_id)?;
        Ok(ExternalAddress {
            ip: record.external.to_string(),
            hostname: String::new(),
        })
    }

    async fn get_internal_address(&self, port_id: &str) -> Result<String, PortManagerError> {
        Ok(self.record(port_id)?.internal.to_string())
    }
}
