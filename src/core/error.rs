use thiserror::Error;
use uuid::Uuid;

use super::context::ContextStatus;

/// Core error type for the data model layer.
///
/// Uses `thiserror` with `#[source]` annotations so error chains are
/// preserved for debugging and error handling.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CoreError {
    /// Serialization failed when encoding a payload to bytes.
    #[error("serialization failed")]
    Serialization(#[source] serde_json::Error),

    /// Deserialization failed when decoding bytes to a payload.
    #[error("deserialization failed")]
    Deserialization(#[source] serde_json::Error),

    /// An invalid status string was encountered during parsing.
    #[error("invalid status: {0}")]
    InvalidStatus(String),

    /// A status transition outside the transition table was requested.
    #[error("invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ContextStatus,
        to: ContextStatus,
    },

    /// The requested context was not found.
    #[error("context not found: {0}")]
    ContextNotFound(Uuid),

    /// The requested trace was not found.
    #[error("trace not found: {0}")]
    TraceNotFound(Uuid),
}

pub type Result<T> = std::result::Result<T, CoreError>;
