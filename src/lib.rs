//! Nostos: crash recovery and ownership coordination for flow engines.
//!
//! `nostos` (νόστος, Greek for "homecoming") is the machinery that lets a
//! flow-execution engine, running as multiple cooperating cluster
//! instances, safely resume work on in-flight flow instances after a
//! process crash — without ever processing the same unit of work twice.
//!
//! # How it fits together
//!
//! A trigger creates a [`core::Trace`] and seed [`core::Context`]s. A
//! worker claims the trace through [`lock::OwnerService`] and advances its
//! contexts through the published [`definition::Definition`], persisting
//! every transition through [`storage::ContextStore`]'s conditional
//! operations. If the worker crashes, its lease expires;
//! [`recovery::RestartSchedule`], running independently on every instance,
//! finds the stranded contexts, reclaims ownership, and re-admits them.
//!
//! # Example
//!
//! ```no_run
//! use nostos::prelude::*;
//! use std::time::Duration;
//!
//! struct Echo;
//!
//! #[async_trait::async_trait]
//! impl NodeExecutor for Echo {
//!     async fn execute(
//!         &self,
//!         _node: &NodeSpec,
//!         _context: &Context,
//!     ) -> Result<Option<Vec<u8>>, BoxError> {
//!         Ok(None)
//!     }
//! }
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryStore::new());
//! let locks = Arc::new(InMemoryTraceLocks::new());
//! let registry = Arc::new(Registry::new());
//! registry.publish_json(include_str!("../demos/echo_flow.json"))?;
//!
//! let owner = Arc::new(OwnerService::new(Arc::clone(&locks), "engine-1"));
//! let executor = Arc::new(Executor::new(
//!     Arc::clone(&store),
//!     Arc::clone(&registry),
//!     Arc::new(Echo),
//! ));
//!
//! // Trigger a flow, then let the recovery loop guard the fleet.
//! executor.start_trace("echo", b"{}", None, None).await?;
//! let schedule = RestartSchedule::new(store, owner, registry, executor)
//!     .with_poll_interval(Duration::from_secs(30))
//!     .start();
//!
//! // ... application runs ...
//! schedule.shutdown().await;
//! # Ok(())
//! # }
//! ```
//!
//! # Module Organization
//!
//! Each module hides one design decision likely to change:
//!
//! - [`core`]: the persisted data model (hides the payload encoding)
//! - [`definition`]: flow graphs and their cache (hides the document format)
//! - [`storage`]: persistence (hides the database choice and schema)
//! - [`retry`]: retry budgets and backoff bookkeeping
//! - [`lock`]: lease-based trace ownership (hides the lock backend)
//! - [`executor`]: the normal execution path (hides scheduling strategy)
//! - [`recovery`]: the restart schedule that re-admits abandoned work
//!
//! # Correctness model
//!
//! Two primitives carry the whole design. The lock layer's fencing renew
//! guarantees at most one live owner per trace; the storage layer's
//! compare-and-swap status updates guarantee a stale or racing writer
//! degrades to a no-op. Everything else — recovery passes on every node,
//! concurrent triggers, crashed workers — composes from those two.

pub mod core;
pub mod definition;
pub mod executor;
pub mod lock;
pub mod recovery;
pub mod retry;
pub mod storage;

pub use crate::core::{Context, ContextStatus, RetryPolicy, Trace, TraceStatus};
pub use definition::{Definition, NodeId, Registry};
pub use executor::{BoxError, ExecutionError, Executor, NodeExecutor};
pub use lock::{InMemoryTraceLocks, LockError, OwnerService, Ownership, TraceLocks};
pub use recovery::{RestartHandle, RestartReport, RestartSchedule};
pub use retry::{RetryLedger, RetryVerdict};
pub use storage::{ContextStore, InMemoryStore, Page, PageRequest, StorageError};

#[cfg(feature = "sqlite")]
pub use storage::{PoolConfig, SqliteStore};

// Re-export dependencies used in the public API so downstream crates
// cannot end up with version mismatches on these types.
pub use serde;
pub use tokio;
pub use uuid;

/// Prelude module for convenient glob imports.
///
/// # Example
///
/// ```ignore
/// use nostos::prelude::*;
/// ```
pub mod prelude {
    pub use crate::core::{
        Backoff, Context, ContextStatus, CoreError, RetryPolicy, RetryRecord, Trace, TraceStatus,
    };

    pub use crate::definition::{
        Definition, DefinitionError, NodeId, NodeKind, NodeSpec, Registry,
    };

    pub use crate::executor::{BoxError, ExecutionError, Executor, NodeExecutor};

    pub use crate::lock::{
        InMemoryTraceLocks, LockError, LockInfo, OwnerService, Ownership, TraceLocks,
    };

    pub use crate::recovery::{RestartHandle, RestartReport, RestartSchedule};

    pub use crate::retry::{RetryLedger, RetryVerdict};

    pub use crate::storage::{ContextStore, InMemoryStore, Page, PageRequest, StorageError};

    #[cfg(feature = "sqlite")]
    pub use crate::storage::{PoolConfig, SqliteStore};

    // Commonly used external types.
    pub use serde::{Deserialize, Serialize};
    pub use std::sync::Arc;
    pub use uuid::Uuid;
}
