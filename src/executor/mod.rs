//! The normal execution path: advancing a trace's contexts through its
//! definition graph.
//!
//! Node business semantics stay outside the crate behind the
//! [`NodeExecutor`] trait; this module supplies everything around it —
//! seeding traces, promoting contexts whose upstream work is done,
//! persisting every transition through the store's conditional operations,
//! and aborting the moment trace ownership is lost.
//!
//! All mutation here requires a live [`Ownership`] guard. The guard check
//! before each persist is the fencing discipline: a worker whose lease
//! expired stops before touching state the next owner may already be
//! advancing.

use crate::core::{Context, ContextStatus, Trace};
use crate::definition::{Definition, DefinitionError, NodeId, NodeKind, NodeSpec, Registry};
use crate::lock::{LockError, Ownership};
use crate::retry::{RetryLedger, RetryVerdict};
use crate::storage::{ContextStore, StorageError};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

/// A boxed error that can be sent across threads.
///
/// This is the standard error type used throughout async Rust ecosystems;
/// any error implementing `std::error::Error` converts into it.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Execution layer error type.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ExecutionError {
    /// A storage operation failed.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// A lock operation failed.
    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    /// The flow definition could not be resolved or is inconsistent with
    /// persisted state.
    #[error("definition error: {0}")]
    Definition(#[from] DefinitionError),

    /// Trace ownership was lost mid-flight; all work for the trace was
    /// aborted before the mutation that would have raced the next owner.
    #[error("ownership lost for trace {0}")]
    OwnershipLost(Uuid),
}

pub type Result<T> = std::result::Result<T, ExecutionError>;

/// The node-execution collaborator boundary.
///
/// Implementations run the business logic of a single node visit and
/// return the payload that flows onward (`None` keeps the incoming
/// payload). What a start/state/end node *does* is entirely up to the
/// implementation; the engine only cares whether it succeeded.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &NodeSpec,
        context: &Context,
    ) -> std::result::Result<Option<Vec<u8>>, BoxError>;
}

/// Advances traces through their definition graphs.
///
/// One `Executor` is shared per process between the worker pool and the
/// restart schedule; both hand it an [`Ownership`] guard and let it drain
/// the trace.
pub struct Executor<S, N> {
    store: Arc<S>,
    registry: Arc<Registry>,
    nodes: Arc<N>,
    ledger: RetryLedger<S>,
}

impl<S: ContextStore, N: NodeExecutor> Executor<S, N> {
    pub fn new(store: Arc<S>, registry: Arc<Registry>, nodes: Arc<N>) -> Self {
        Self {
            ledger: RetryLedger::new(Arc::clone(&store)),
            store,
            registry,
            nodes,
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The trigger boundary: persists a new trace plus one seed `New`
    /// context per start node of the stream's definition.
    pub async fn start_trace(
        &self,
        stream_id: &str,
        payload: &[u8],
        operator: Option<&str>,
        tenant: Option<&str>,
    ) -> Result<Trace> {
        let definition = self.registry.resolve(stream_id)?;

        let mut trace = Trace::new(Uuid::new_v4(), stream_id);
        if let Some(operator) = operator {
            trace = trace.with_operator(operator);
        }
        if let Some(tenant) = tenant {
            trace = trace.with_tenant(tenant);
        }

        let seeds: Vec<Context> = definition
            .roots()
            .iter()
            .map(|root| Context::seed(trace.trace_id(), stream_id, root.clone(), payload.to_vec()))
            .collect();

        self.store.save_trace(&trace).await?;
        self.store.save_contexts(&seeds).await?;

        debug!(
            trace_id = %trace.trace_id(),
            stream_id = %stream_id,
            seeds = seeds.len(),
            "trace started"
        );
        Ok(trace)
    }

    /// Drains the owned trace: claims `New` contexts, re-admits eligible
    /// `Retryable` ones, promotes ready `Pending` contexts, and executes
    /// everything `Ready`, looping until no further progress is possible.
    ///
    /// Returns the number of node executions performed. All transitions
    /// are conditional, so interleaving with a racing pass (which should
    /// not exist while the guard is valid, but costs nothing to tolerate)
    /// degrades to lost swaps, never double execution.
    pub async fn drive_trace(&self, guard: &Ownership) -> Result<usize> {
        let trace_id = guard.trace_id();
        let trace = self
            .store
            .get_trace(trace_id)
            .await?
            .ok_or(StorageError::TraceNotFound(trace_id))?;
        let definition = self.registry.resolve(trace.stream_id())?;

        let mut executed = 0;
        loop {
            self.check_guard(guard)?;
            let contexts = self.store.contexts_for_trace(trace_id).await?;
            let mut progressed = false;

            // Claim work the crashed (or absent) worker never picked up.
            let new_ids: Vec<Uuid> = contexts
                .iter()
                .filter(|ctx| ctx.status() == ContextStatus::New)
                .map(|ctx| ctx.id())
                .collect();
            if !new_ids.is_empty() {
                self.check_guard(guard)?;
                progressed |= self
                    .store
                    .update_status(&new_ids, ContextStatus::New, ContextStatus::Pending)
                    .await?
                    > 0;
            }

            // Re-admit parked contexts whose backoff has elapsed; terminate
            // the ones that exhausted their budget while parked.
            for ctx in contexts
                .iter()
                .filter(|ctx| ctx.status() == ContextStatus::Retryable)
            {
                self.check_guard(guard)?;
                if self.ledger.is_exhausted(ctx, &definition).await? {
                    progressed |= self.store.fail_context(ctx.id()).await?;
                } else if self.ledger.is_eligible(ctx.id(), Utc::now()).await? {
                    progressed |= self.store.requeue_retryable(ctx.id()).await?;
                }
            }

            // Promote contexts whose upstream siblings are done.
            let contexts = self.store.contexts_for_trace(trace_id).await?;
            for ctx in contexts
                .iter()
                .filter(|ctx| ctx.status() == ContextStatus::Pending)
            {
                if is_ready(&definition, &contexts, ctx) {
                    self.check_guard(guard)?;
                    progressed |= self
                        .store
                        .update_status(&[ctx.id()], ContextStatus::Pending, ContextStatus::Ready)
                        .await?
                        > 0;
                }
            }

            // Execute everything ready.
            let contexts = self.store.contexts_for_trace(trace_id).await?;
            for ctx in contexts
                .iter()
                .filter(|ctx| ctx.status() == ContextStatus::Ready)
            {
                if self.execute_ready(guard, &definition, ctx).await? {
                    progressed = true;
                    executed += 1;
                }
            }

            if !progressed {
                break;
            }
        }

        Ok(executed)
    }

    /// Runs one `Ready` context's node and persists the outcome.
    /// Returns whether any transition was applied.
    async fn execute_ready(
        &self,
        guard: &Ownership,
        definition: &Definition,
        context: &Context,
    ) -> Result<bool> {
        let node = definition
            .node(context.position())
            .ok_or_else(|| DefinitionError::UnknownNode(context.position().to_string()))?;

        match self.nodes.execute(node, context).await {
            Ok(payload) => {
                let data = payload.unwrap_or_else(|| context.data().to_vec());
                let successors = definition.successors(context.position());

                self.check_guard(guard)?;
                if successors.is_empty() || node.kind() == NodeKind::End {
                    Ok(self.store.archive_context(context.id(), &data).await?)
                } else {
                    let batch = context.to_batch() + 1;
                    match self
                        .store
                        .advance_context(context.id(), successors, batch, &data)
                        .await
                    {
                        Ok(moved) => Ok(moved.is_some()),
                        // A sibling got to the join first; this context's
                        // work is delivered, so it terminates here.
                        Err(StorageError::DuplicateContext { .. }) => {
                            debug!(
                                context_id = %context.id(),
                                position = %context.position(),
                                "successor occupied by sibling, archiving in place"
                            );
                            Ok(self.store.archive_context(context.id(), &data).await?)
                        }
                        Err(e) => Err(e.into()),
                    }
                }
            }
            Err(e) => {
                warn!(
                    context_id = %context.id(),
                    trace_id = %context.trace_id(),
                    position = %context.position(),
                    error = %e,
                    "node execution failed"
                );
                self.check_guard(guard)?;
                let verdict = self.ledger.record_failure(context, definition).await?;
                Ok(verdict != RetryVerdict::Lost)
            }
        }
    }

    fn check_guard(&self, guard: &Ownership) -> Result<()> {
        if guard.is_valid() {
            Ok(())
        } else {
            Err(ExecutionError::OwnershipLost(guard.trace_id()))
        }
    }
}

/// Graph-readiness rule: a context at position P may run once every
/// predecessor node of P holds no non-terminal sibling context of the
/// same trace. Seed contexts at start nodes have no predecessors and are
/// always ready.
pub(crate) fn is_ready(definition: &Definition, contexts: &[Context], context: &Context) -> bool {
    definition
        .predecessors(context.position())
        .iter()
        .all(|pred| no_active_context_at(contexts, context, pred))
}

fn no_active_context_at(contexts: &[Context], subject: &Context, position: &NodeId) -> bool {
    !contexts.iter().any(|ctx| {
        ctx.id() != subject.id()
            && ctx.trace_id() == subject.trace_id()
            && ctx.position() == position
            && !ctx.status().is_terminal()
    })
}
