//! Core types for the crash-recovery subsystem.
//!
//! This module provides the persisted data model that the rest of the crate
//! coordinates around:
//!
//! # Domain Model
//! - [`Context`]: the unit of execution state, one per (trace, node) visit
//! - [`ContextStatus`]: the execution state machine and its transition table
//! - [`Trace`] / [`TraceStatus`]: one end-to-end flow execution instance
//! - [`RetryRecord`]: retry-budget bookkeeping for one context
//!
//! # Retry Behavior
//! - [`RetryPolicy`]: attempt budget and backoff strategy, fixed or
//!   exponential, carried per node by the flow definition
//!
//! # Serialization
//! - [`serialize_value`] / [`deserialize_value`]: opaque payload encoding
//!
//! # Error Handling
//! - [`CoreError`] and the module-level [`Result`] alias

mod context;
mod error;
pub mod retry;
mod serialization;
mod trace;

pub use context::{Context, ContextStatus};
pub use error::{CoreError, Result};
pub use retry::{Backoff, RetryPolicy, RetryRecord};
pub use serialization::{deserialize_value, serialize_value};
pub use trace::{Trace, TraceStatus};
