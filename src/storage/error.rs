use crate::core::{ContextStatus, CoreError};
use crate::definition::NodeId;
use thiserror::Error;
use uuid::Uuid;

/// Storage layer error type.
///
/// Wraps underlying database and serialization errors while preserving the
/// full error chain. Lost compare-and-swap races are NOT errors — the
/// conditional operations report them through their return values.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    /// A database operation failed.
    #[cfg(feature = "sqlite")]
    #[error("database operation failed")]
    Database(#[from] sqlx::Error),

    /// Could not reach or configure the backing store.
    #[error("connection error: {0}")]
    Connection(String),

    /// A core serialization or model error occurred.
    #[error("core error: {0}")]
    Core(#[from] CoreError),

    /// An insert would violate the active `(trace_id, position)` uniqueness
    /// invariant.
    #[error("active context already exists: trace={trace_id}, position={position}")]
    DuplicateContext { trace_id: Uuid, position: NodeId },

    /// A status transition outside the transition table was requested.
    /// This is a caller bug, distinct from losing a conditional update.
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

    /// A parameter failed validation before reaching the store.
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;
