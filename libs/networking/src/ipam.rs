//! IPv4 address management for address pools.

use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::PortManagerError;

/// IPv4 prefix for pool allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Ipv4Prefix {
    /// Base address of the prefix.
    pub address: Ipv4Addr,

    /// Prefix length (e.g., 24 for /24).
    pub prefix_len: u8,
}

impl Ipv4Prefix {
    /// Create a new prefix. The address is masked to the prefix length.
    pub fn new(address: Ipv4Addr, prefix_len: u8) -> Result<Self, PortManagerError> {
        if prefix_len > 32 {
            return Err(PortManagerError::InvalidPrefix(format!(
                "prefix length {} exceeds 32",
                prefix_len
            )));
        }

        Ok(Self {
            address: mask_ipv4(address, prefix_len),
            prefix_len,
        })
    }

    /// Parse from CIDR notation (e.g., "203.0.113.0/24").
    pub fn from_cidr(s: &str) -> Result<Self, PortManagerError> {
        let Some((addr_str, prefix_str)) = s.split_once('/') else {
            return Err(PortManagerError::InvalidPrefix(format!(
                "missing '/' in CIDR: {}",
                s
            )));
        };

        let address = Ipv4Addr::from_str(addr_str)
            .map_err(|_| PortManagerError::InvalidAddress(addr_str.to_string()))?;

        let prefix_len = prefix_str
            .parse::<u8>()
            .map_err(|_| PortManagerError::InvalidPrefix(prefix_str.to_string()))?;

        Self::new(address, prefix_len)
    }

    /// Check if an address is within this prefix.
    pub fn contains(&self, addr: Ipv4Addr) -> bool {
        mask_ipv4(addr, self.prefix_len) == self.address
    }

    /// Number of addresses in this prefix.
    pub fn size(&self) -> u64 {
        1u64 << (32 - u32::from(self.prefix_len))
    }
}

impl std::fmt::Display for Ipv4Prefix {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

fn mask_ipv4(addr: Ipv4Addr, prefix_len: u8) -> Ipv4Addr {
    let bits = u32::from(addr);
    let mask = if prefix_len == 0 {
        0
    } else {
        u32::MAX << (32 - u32::from(prefix_len.min(32)))
    };
    Ipv4Addr::from(bits & mask)
}

/// Sequential IPv4 address allocator.
///
/// Skips the network address. Released addresses are not reused.
#[derive(Debug, Clone)]
pub struct Ipv4Allocator {
    prefix: Ipv4Prefix,
    next_offset: u64,
    max_offset: u64,
}

impl Ipv4Allocator {
    pub fn new(prefix: Ipv4Prefix) -> Self {
        Self {
            prefix,
            next_offset: 1,
            max_offset: prefix.size(),
        }
    }

    /// Allocate the next available address.
    pub fn allocate(&mut self) -> Result<Ipv4Addr, PortManagerError> {
        if self.next_offset >= self.max_offset {
            return Err(PortManagerError::PoolExhausted(self.prefix.to_string()));
        }

        let addr = u64::from(u32::from(self.prefix.address)) + self.next_offset;
        self.next_offset += 1;

        Ok(Ipv4Addr::from(addr as u32))
    }

    pub fn prefix(&self) -> &Ipv4Prefix {
        &self.prefix
    }

    /// Remaining addresses.
    pub fn remaining(&self) -> u64 {
        self.max_offset.saturating_sub(self.next_offset)
    }
}
