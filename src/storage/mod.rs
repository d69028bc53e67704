//! Persistence layer for contexts, traces, and retry bookkeeping.
//!
//! This module provides a trait-based interface over the backing store with
//! two implementations:
//!
//! - [`InMemoryStore`]: concurrent in-memory storage for testing and
//!   single-process development
//! - [`SqliteStore`]: persistent SQLite-based storage with connection
//!   pooling (feature `sqlite`, enabled by default)
//!
//! [`ContextStore`] is the **sole writer** of context and trace state.
//! Every mutation is either a conditional update (compare-and-swap on the
//! current status, returning the affected count) or a composite operation
//! that a backend must apply atomically. That discipline is what makes
//! concurrent recovery passes and normal execution safe to interleave: a
//! racing caller that loses the conditional update is a no-op, never a
//! corruption.

use crate::core::{Context, ContextStatus, RetryRecord, Trace};
use crate::definition::NodeId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

mod error;
pub mod memory;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use error::{Result, StorageError};
pub use memory::InMemoryStore;

#[cfg(feature = "sqlite")]
pub use sqlite::{PoolConfig, SqliteStore};

/// Default page size for status scans.
pub const DEFAULT_PAGE_SIZE: usize = 200;

/// Keyset cursor for paged status scans.
///
/// Pages are ordered by context id and resumed from the last id seen, so a
/// scan never skips or duplicates a context even while the scanned set is
/// mutated concurrently.
#[derive(Debug, Clone, Copy, Default)]
pub struct PageRequest {
    /// Resume after this context id; `None` starts from the beginning.
    pub after: Option<Uuid>,
    /// Maximum number of contexts to return.
    pub limit: usize,
}

impl PageRequest {
    /// The first page of a scan.
    pub fn first(limit: usize) -> Self {
        Self { after: None, limit }
    }

    /// The page following a cursor.
    pub fn after(cursor: Uuid, limit: usize) -> Self {
        Self {
            after: Some(cursor),
            limit,
        }
    }
}

/// One page of scan results.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Cursor for the next page; `None` when the scan is complete. A full
    /// final page yields one trailing empty page.
    pub next: Option<Uuid>,
}

impl<T> Page<T> {
    pub fn is_last(&self) -> bool {
        self.next.is_none()
    }
}

/// Trait for context/trace persistence backends.
///
/// Implementations must be thread-safe, must apply each composite operation
/// atomically (partial application must never be observable), and must
/// implement the conditional operations with compare-and-swap semantics so
/// that exactly one of any number of racing callers wins.
#[async_trait]
pub trait ContextStore: Send + Sync {
    // ===== Traces =====

    /// Persists a new trace.
    async fn save_trace(&self, trace: &Trace) -> Result<()>;

    /// Fetches a trace by id.
    async fn get_trace(&self, trace_id: Uuid) -> Result<Option<Trace>>;

    // ===== Contexts =====

    /// Inserts new contexts.
    ///
    /// Rejects an insert whose `(trace_id, position)` collides with a
    /// still-active (non-terminal) context.
    async fn save_contexts(&self, contexts: &[Context]) -> Result<()>;

    /// Fetches a context by id.
    async fn get_context(&self, id: Uuid) -> Result<Option<Context>>;

    /// All contexts of a trace, ordered by creation time.
    async fn contexts_for_trace(&self, trace_id: Uuid) -> Result<Vec<Context>>;

    /// Conditionally transitions contexts from `from` to `to`.
    ///
    /// Only rows whose persisted status still equals `from` are updated;
    /// the affected count is returned. A count lower than `ids.len()` means
    /// some race was lost — expected concurrency, not an error.
    ///
    /// # Errors
    /// Returns `StorageError::InvalidTransition` when `from -> to` is not a
    /// row of the status transition table.
    async fn update_status(
        &self,
        ids: &[Uuid],
        from: ContextStatus,
        to: ContextStatus,
    ) -> Result<u64>;

    /// Paged scan of a stream's contexts by status set, ordered by id.
    async fn contexts_by_status(
        &self,
        stream_id: &str,
        statuses: &[ContextStatus],
        page: PageRequest,
    ) -> Result<Page<Context>>;

    /// Distinct stream ids that hold at least one non-terminal context.
    /// Seeds the recovery scan and surfaces streams whose definition can no
    /// longer be resolved.
    async fn active_streams(&self) -> Result<Vec<String>>;

    // ===== Composite atomic operations =====

    /// Moves a `Ready` context forward through a fan-out: the context
    /// itself moves to the first successor position in `Pending`, and one
    /// sibling context per remaining successor is created sharing `batch`.
    ///
    /// Returns the moved context followed by the created siblings, or
    /// `None` when the compare-and-swap on `Ready` was lost.
    async fn advance_context(
        &self,
        id: Uuid,
        successors: &[NodeId],
        batch: i64,
        data: &[u8],
    ) -> Result<Option<Vec<Context>>>;

    /// Terminates a `Ready` context as `Archived`, stores its final
    /// payload, clears retry bookkeeping, and recomputes the trace status.
    /// Returns false when the compare-and-swap was lost.
    async fn archive_context(&self, id: Uuid, data: &[u8]) -> Result<bool>;

    /// Parks a `Ready` context as `Retryable`: one more attempt is
    /// recorded and the context becomes eligible again at `next_eligible`.
    /// Returns the new attempt count, or `None` when the compare-and-swap
    /// was lost.
    async fn park_retryable(
        &self,
        id: Uuid,
        next_eligible: DateTime<Utc>,
    ) -> Result<Option<u32>>;

    /// Re-admits a `Retryable` context as `Pending`. The retry record is
    /// kept until the context terminates. Returns false when the
    /// compare-and-swap was lost.
    async fn requeue_retryable(&self, id: Uuid) -> Result<bool>;

    /// Terminates a `Retryable` context as `Error` (budget exhausted),
    /// clears retry bookkeeping, and recomputes the trace status. Returns
    /// false when the compare-and-swap was lost.
    async fn fail_context(&self, id: Uuid) -> Result<bool>;

    // ===== Retry bookkeeping =====

    /// Fetches the retry record for a context, if one exists.
    async fn get_retry(&self, context_id: Uuid) -> Result<Option<RetryRecord>>;

    // ===== Maintenance =====

    /// Deletes all stored state.
    async fn reset(&self) -> Result<()>;

    /// Closes the backend.
    async fn close(&self) -> Result<()>;
}

// Type-erased stores remain usable behind a Box.
#[async_trait]
impl ContextStore for Box<dyn ContextStore> {
    async fn save_trace(&self, trace: &Trace) -> Result<()> {
        (**self).save_trace(trace).await
    }

    async fn get_trace(&self, trace_id: Uuid) -> Result<Option<Trace>> {
        (**self).get_trace(trace_id).await
    }

    async fn save_contexts(&self, contexts: &[Context]) -> Result<()> {
        (**self).save_contexts(contexts).await
    }

    async fn get_context(&self, id: Uuid) -> Result<Option<Context>> {
        (**self).get_context(id).await
    }

    async fn contexts_for_trace(&self, trace_id: Uuid) -> Result<Vec<Context>> {
        (**self).contexts_for_trace(trace_id).await
    }

    async fn update_status(
        &self,
        ids: &[Uuid],
        from: ContextStatus,
        to: ContextStatus,
    ) -> Result<u64> {
        (**self).update_status(ids, from, to).await
    }

    async fn contexts_by_status(
        &self,
        stream_id: &str,
        statuses: &[ContextStatus],
        page: PageRequest,
    ) -> Result<Page<Context>> {
        (**self).contexts_by_status(stream_id, statuses, page).await
    }

    async fn active_streams(&self) -> Result<Vec<String>> {
        (**self).active_streams().await
    }

    async fn advance_context(
        &self,
        id: Uuid,
        successors: &[NodeId],
        batch: i64,
        data: &[u8],
    ) -> Result<Option<Vec<Context>>> {
        (**self).advance_context(id, successors, batch, data).await
    }

    async fn archive_context(&self, id: Uuid, data: &[u8]) -> Result<bool> {
        (**self).archive_context(id, data).await
    }

    async fn park_retryable(
        &self,
        id: Uuid,
        next_eligible: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        (**self).park_retryable(id, next_eligible).await
    }

    async fn requeue_retryable(&self, id: Uuid) -> Result<bool> {
        (**self).requeue_retryable(id).await
    }

    async fn fail_context(&self, id: Uuid) -> Result<bool> {
        (**self).fail_context(id).await
    }

    async fn get_retry(&self, context_id: Uuid) -> Result<Option<RetryRecord>> {
        (**self).get_retry(context_id).await
    }

    async fn reset(&self) -> Result<()> {
        (**self).reset().await
    }

    async fn close(&self) -> Result<()> {
        (**self).close().await
    }
}
