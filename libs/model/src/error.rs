//! Error types for parsing model values.

use thiserror::Error;

/// Errors that can occur when parsing model values from strings.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    /// The service key has no `/` separator.
    #[error("not a valid namespace/name key: '{0}'")]
    InvalidKey(String),

    /// The namespace or name portion of a key is empty.
    #[error("service key has an empty {part}: '{key}'")]
    EmptyKeyPart { part: &'static str, key: String },

    /// Unknown transport protocol.
    #[error("unknown protocol: '{0}'")]
    UnknownProtocol(String),
}

impl ModelError {
    /// Returns true if this error came from parsing a service key.
    pub fn is_key_error(&self) -> bool {
        matches!(
            self,
            ModelError::InvalidKey(_) | ModelError::EmptyKeyPart { .. }
        )
    }
}
