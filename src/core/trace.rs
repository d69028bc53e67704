use super::error::CoreError;
use super::ContextStatus;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Overall status of a trace, derived from its contexts.
///
/// A trace is `Failed` as soon as any context is terminal `Error`,
/// `Complete` once every context is terminal without errors, and `Running`
/// otherwise. Traces are never deleted, only archived by reaching a
/// terminal status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TraceStatus {
    Running,
    Complete,
    Failed,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Running => "RUNNING",
            TraceStatus::Complete => "COMPLETE",
            TraceStatus::Failed => "FAILED",
        }
    }

    /// Derives the trace status from the statuses of its contexts.
    ///
    /// An empty context set counts as `Running`: the trace was created but
    /// its seed contexts have not been persisted yet.
    pub fn derive<I: IntoIterator<Item = ContextStatus>>(statuses: I) -> Self {
        let mut any = false;
        let mut all_terminal = true;
        for status in statuses {
            any = true;
            if status == ContextStatus::Error {
                return TraceStatus::Failed;
            }
            if !status.is_terminal() {
                all_terminal = false;
            }
        }
        if any && all_terminal {
            TraceStatus::Complete
        } else {
            TraceStatus::Running
        }
    }
}

impl fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TraceStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RUNNING" => Ok(TraceStatus::Running),
            "COMPLETE" => Ok(TraceStatus::Complete),
            "FAILED" => Ok(TraceStatus::Failed),
            _ => Err(CoreError::InvalidStatus(s.to_string())),
        }
    }
}

/// One end-to-end execution instance of a flow definition.
///
/// Created when a trigger starts a flow; mutated only by the owning worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trace {
    trace_id: Uuid,
    stream_id: String,
    status: TraceStatus,
    operator: Option<String>,
    tenant: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl Trace {
    /// Creates a new running trace for the given stream.
    pub fn new(trace_id: Uuid, stream_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            trace_id,
            stream_id: stream_id.into(),
            status: TraceStatus::Running,
            operator: None,
            tenant: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_operator(mut self, operator: impl Into<String>) -> Self {
        self.operator = Some(operator.into());
        self
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>) -> Self {
        self.tenant = Some(tenant.into());
        self
    }

    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn stream_id(&self) -> &str {
        &self.stream_id
    }

    pub fn status(&self) -> TraceStatus {
        self.status
    }

    pub fn operator(&self) -> Option<&str> {
        self.operator.as_deref()
    }

    pub fn tenant(&self) -> Option<&str> {
        self.tenant.as_deref()
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn set_status(&mut self, status: TraceStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Reconstructs a trace from persisted fields.
    pub fn from_parts(
        trace_id: Uuid,
        stream_id: String,
        status: TraceStatus,
        operator: Option<String>,
        tenant: Option<String>,
        created_at: DateTime<Utc>,
        updated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trace_id,
            stream_id,
            status,
            operator,
            tenant,
            created_at,
            updated_at,
        }
    }
}
