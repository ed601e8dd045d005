//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic failures of the job model itself
/// (malformed requests, invalid fields). Infrastructure concerns belong to
/// the store/engine/ingress crates.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A job request failed validation (e.g. a required field is missing).
    #[error("validation failed: {0}")]
    Validation(String),

    /// A field was present but could not be parsed.
    #[error("invalid field {field}: {message}")]
    InvalidField { field: &'static str, message: String },
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_field(field: &'static str, msg: impl Into<String>) -> Self {
        Self::InvalidField {
            field,
            message: msg.into(),
        }
    }
}
