use super::error::{CoreError, Result};
use super::serialization::deserialize_value;
use crate::definition::NodeId;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Execution state of a context.
///
/// Transitions are monotonic except for the `Retryable` cycle: a failed
/// context re-enters processing via `Pending` and eventually terminates
/// as `Archived` or `Error`. The full table:
///
/// | Status      | Valid predecessors   |
/// |-------------|----------------------|
/// | `New`       | (initial)            |
/// | `Pending`   | `New`, `Retryable`   |
/// | `Ready`     | `Pending`            |
/// | `Retryable` | `Ready`              |
/// | `Archived`  | `Ready` (terminal)   |
/// | `Error`     | `Retryable` (terminal) |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContextStatus {
    /// Created, not yet claimed for processing.
    New,
    /// Claimed by a worker, awaiting downstream readiness.
    Pending,
    /// All upstream dependencies satisfied, eligible to execute now.
    Ready,
    /// Execution failed but retry budget remains.
    Retryable,
    /// Execution completed successfully (terminal).
    Archived,
    /// Execution failed and retry budget exhausted (terminal).
    Error,
}

impl ContextStatus {
    /// All non-terminal statuses, in scan order. This is the set the
    /// recovery pass looks for.
    pub const NON_TERMINAL: [ContextStatus; 4] = [
        ContextStatus::New,
        ContextStatus::Pending,
        ContextStatus::Ready,
        ContextStatus::Retryable,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextStatus::New => "NEW",
            ContextStatus::Pending => "PENDING",
            ContextStatus::Ready => "READY",
            ContextStatus::Retryable => "RETRYABLE",
            ContextStatus::Archived => "ARCHIVED",
            ContextStatus::Error => "ERROR",
        }
    }

    /// Returns true if no further transition is allowed from this status.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContextStatus::Archived | ContextStatus::Error)
    }

    /// Returns true if `prev -> self` is a row of the transition table.
    pub fn valid_from(&self, prev: ContextStatus) -> bool {
        match self {
            ContextStatus::New => false,
            ContextStatus::Pending => {
                matches!(prev, ContextStatus::New | ContextStatus::Retryable)
            }
            ContextStatus::Ready => matches!(prev, ContextStatus::Pending),
            ContextStatus::Retryable => matches!(prev, ContextStatus::Ready),
            ContextStatus::Archived => matches!(prev, ContextStatus::Ready),
            ContextStatus::Error => matches!(prev, ContextStatus::Retryable),
        }
    }
}

impl fmt::Display for ContextStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ContextStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(ContextStatus::New),
            "PENDING" => Ok(ContextStatus::Pending),
            "READY" => Ok(ContextStatus::Ready),
            "RETRYABLE" => Ok(ContextStatus::Retryable),
            "ARCHIVED" => Ok(ContextStatus::Archived),
            "ERROR" => Ok(ContextStatus::Error),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// The unit of execution state: one context exists per (trace, node) visit.
///
/// A context is created `New` at a seed position, advances through the
/// definition graph as its node executes, and terminates `Archived` or
/// `Error`. The `(trace_id, position)` pair is unique while the context is
/// active; `to_batch` groups siblings produced by the same fan-out.
///
/// The business payload travels as opaque serialized bytes; use
/// [`Context::deserialize_data`] to recover the typed value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Context {
    id: Uuid,
    trace_id: Uuid,
    stream_id: String,
    position: NodeId,
    status: ContextStatus,
    data: Vec<u8>,
    retry_count: u32,
    to_batch: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Context {
    /// Creates a seed context in `New` status at the given position.
    ///
    /// Seed contexts carry batch marker 0; the marker increases as the
    /// context advances along the graph.
    pub fn seed(
        trace_id: Uuid,
        stream_id: impl Into<String>,
        position: NodeId,
        data: Vec<u8>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trace_id,
            stream_id: stream_id.into(),
            position,
            status: ContextStatus::New,
            data,
            retry_count: 0,
            to_batch: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a sibling context spawned by a fan-out at `position`.
    ///
    /// Siblings of the same fan-out share a `to_batch` value, which is what
    /// groups them for join-readiness checks.
    pub fn sibling(parent: &Context, position: NodeId, batch: i64, data: Vec<u8>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            trace_id: parent.trace_id,
            stream_id: parent.stream_id.clone(),
            position,
            status: ContextStatus::Pending,
            data,
            retry_count: 0,
            to_batch: batch,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn position(&self) -> &NodeId {
        &self.position
    }

    pub fn status(&self) -> ContextStatus {
        self.status
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn retry_count(&self) -> u32 {
        self.retry_count
    }

    pub fn to_batch(&self) -> i64 {
        self.to_batch
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Decodes the opaque payload into a typed value.
    pub fn deserialize_data<T: DeserializeOwned>(&self) -> Result<T> {
        deserialize_value(&self.data)
    }

    pub fn set_status(&mut self, status: ContextStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    pub fn set_position(&mut self, position: NodeId) {
        self.position = position;
        self.updated_at = Utc::now();
    }

    pub fn set_data(&mut self, data: Vec<u8>) {
        self.data = data;
        self.updated_at = Utc::now();
    }

    pub fn set_to_batch(&mut self, batch: i64) {
        self.to_batch = batch;
        self.updated_at = Utc::now();
    }

    pub fn increment_retry_count(&mut self) {
        self.retry_count += 1;
        self.updated_at = Utc::now();
    }

    /// Reconstructs a context from persisted fields. Intended for storage
    /// backends mapping rows back into the domain type.
    #[allow(clippy::too_many_arguments)]
    pub fn from_parts(
        id: Uuid,
        trace_id: Uuid,
        stream_id: String,
        position: NodeId,
        status: ContextStatus,
        data: Vec<u8>,
        retry_count: u32,
        to_batch: i64,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            trace_id,
            stream_id,
            position,
            status,
            data,
            retry_count,
            to_batch,
            created_at,
            updated_at,
        }
    }
}
