use thiserror::Error;

/// Errors reported by L3 port backends.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PortManagerError {
    /// The port does not exist in the backend.
    #[error("port not found: {0}")]
    NotFound(String),

    /// No further ports can be provisioned.
    #[error("port pool exhausted: {0}")]
    PoolExhausted(String),

    /// The backend could not be reached or refused the call.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// Invalid IP address.
    #[error("invalid IP address: {0}")]
    InvalidAddress(String),

    /// Invalid CIDR prefix.
    #[error("invalid CIDR prefix: {0}")]
    InvalidPrefix(String),
}

impl PortManagerError {
    /// Returns true if the pool cannot hand out more ports.
    pub fn is_exhausted(&self) -> bool {
        matches!(self, PortManagerError::PoolExhausted(_))
    }
}
