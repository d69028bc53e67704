//! Distributed mutual exclusion over traces.
//!
//! Correctness of the whole subsystem rests on this module's contract:
//! at most one engine instance may advance the contexts of a trace at any
//! instant. There is no leader election — exclusion comes from lease-based
//! locks keyed by trace id, with a fencing renew that stops a stale owner
//! from continuing after its lease was reclaimed.
//!
//! - [`TraceLocks`]: the lock-store boundary. Any lease-based coordination
//!   backend satisfies it; the crate ships [`InMemoryTraceLocks`] and the
//!   SQLite store's implementation.
//! - [`OwnerService`]: per-process coordinator that claims traces, renews
//!   leases in the background, and notifies when ownership is lost.
//!
//! Failure semantics are fail-closed throughout: if the lock store cannot
//! be reached, the answer is "you do not own this trace".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

mod memory;
mod owner;

pub use memory::InMemoryTraceLocks;
pub use owner::{Ownership, OwnerService};

/// Errors from the lock store.
///
/// Loss of the backend is an error, not a lock: callers must treat any
/// `LockError` as "cannot proceed".
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LockError {
    /// The lock backend failed or is unreachable.
    #[error("lock backend error: {0}")]
    Backend(String),
}

pub type Result<T> = std::result::Result<T, LockError>;

/// A snapshot of who holds a trace's lock.
#[derive(Debug, Clone)]
pub struct LockInfo {
    pub trace_id: Uuid,
    pub owner_id: String,
    pub lease_expiry: DateTime<Utc>,
}

impl LockInfo {
    /// Returns true once the lease has lapsed and the lock is reclaimable.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease_expiry <= now
    }
}

/// Trait for distributed trace-lock backends.
///
/// Implementations must make [`TraceLocks::acquire`] atomic under
/// concurrent callers — of any number racing for the same free (or
/// expired) lock, exactly one may receive `true`.
#[async_trait]
pub trait TraceLocks: Send + Sync {
    /// Attempts to take the lock: creates the lock record if absent or
    /// expired, or extends it if `owner_id` already holds it. Returns
    /// whether ownership was obtained.
    async fn acquire(&self, trace_id: Uuid, owner_id: &str, ttl: Duration) -> Result<bool>;

    /// Extends the lease. Returns false if the caller is no longer the
    /// owner — the lease expired or was reclaimed. This is the fencing
    /// check that prevents split-brain double-processing; a false return
    /// means all in-flight work for the trace must abort.
    async fn renew(&self, trace_id: Uuid, owner_id: &str, ttl: Duration) -> Result<bool>;

    /// Best-effort removal of the lock. Idempotent; releasing a lock held
    /// by someone else is a no-op.
    async fn release(&self, trace_id: Uuid, owner_id: &str) -> Result<()>;

    /// The current lock record, if any. Observability only — never use
    /// this to decide ownership.
    async fn holder(&self, trace_id: Uuid) -> Result<Option<LockInfo>>;
}
