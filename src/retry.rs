//! Retry-budget bookkeeping, independent of the main context status.
//!
//! The ledger decides what happens after a failed execution: park the
//! context `Retryable` with a backoff computed from the node's policy, or
//! terminate it `Error` once the budget is exhausted. Both outcomes go
//! through the store's composite operations, so bookkeeping and status
//! always change together.

use crate::core::{Context, RetryPolicy};
use crate::definition::Definition;
use crate::storage::{ContextStore, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{debug, error};
use uuid::Uuid;

/// Outcome of recording a failure against a context's retry budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryVerdict {
    /// Budget remains; the context is parked until `next_eligible`.
    Retryable {
        attempt: u32,
        next_eligible: DateTime<Utc>,
    },
    /// Budget exhausted; the context was terminated as `Error`.
    Exhausted,
    /// The compare-and-swap was lost — someone else already moved the
    /// context on. Nothing was recorded.
    Lost,
}

/// Retry bookkeeping over a [`ContextStore`].
pub struct RetryLedger<S> {
    store: Arc<S>,
}

impl<S: ContextStore> RetryLedger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Records one failed attempt for a `Ready` context.
    ///
    /// Resolves the node's policy from the definition, computes the next
    /// eligibility time, and parks the context `Retryable`. When that
    /// attempt exhausts the budget the context is terminated `Error`
    /// instead of waiting for a retry that will never come.
    pub async fn record_failure(
        &self,
        context: &Context,
        definition: &Definition,
    ) -> Result<RetryVerdict> {
        let policy = definition.retry_policy(context.position());
        let now = Utc::now();

        // The attempt we are about to record; eligibility is computed for
        // it up front so park and schedule happen in one atomic operation.
        let upcoming = context.retry_count() + 1;
        let next_eligible = policy.next_eligible(upcoming, now).unwrap_or(now);

        let Some(attempt) = self
            .store
            .park_retryable(context.id(), next_eligible)
            .await?
        else {
            debug!(
                context_id = %context.id(),
                "failure not recorded, context already moved on"
            );
            return Ok(RetryVerdict::Lost);
        };

        if policy.is_exhausted(attempt) {
            self.store.fail_context(context.id()).await?;
            error!(
                context_id = %context.id(),
                trace_id = %context.trace_id(),
                position = %context.position(),
                attempt,
                "retry budget exhausted, context terminated"
            );
            return Ok(RetryVerdict::Exhausted);
        }

        debug!(
            context_id = %context.id(),
            attempt,
            next_eligible = %next_eligible,
            "context parked for retry"
        );
        Ok(RetryVerdict::Retryable {
            attempt,
            next_eligible,
        })
    }

    /// Returns true when the context's recorded attempts have consumed the
    /// budget of its node's policy.
    pub async fn is_exhausted(&self, context: &Context, definition: &Definition) -> Result<bool> {
        let policy = definition.retry_policy(context.position());
        let attempts = match self.store.get_retry(context.id()).await? {
            Some(record) => record.attempts,
            None => context.retry_count(),
        };
        Ok(policy.is_exhausted(attempts))
    }

    /// Returns true once a parked context's backoff window has passed.
    /// Contexts without a record are always eligible.
    pub async fn is_eligible(&self, context_id: Uuid, now: DateTime<Utc>) -> Result<bool> {
        Ok(self
            .store
            .get_retry(context_id)
            .await?
            .is_none_or(|record| record.is_eligible(now)))
    }

    /// The effective policy for a context under a definition.
    pub fn policy_for(&self, context: &Context, definition: &Definition) -> RetryPolicy {
        definition.retry_policy(context.position())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ContextStatus;
    use crate::definition::NodeId;
    use crate::storage::InMemoryStore;

    fn definition_with_retry(max_attempts: u32) -> Definition {
        Definition::from_json(&format!(
            r#"{{"version": 1, "stream_id": "orders",
                "nodes": [
                    {{"id": "start", "kind": "start"}},
                    {{"id": "work", "kind": "state",
                      "retry": {{"max_attempts": {}, "backoff": "fixed", "initial_delay_ms": 50}}}},
                    {{"id": "done", "kind": "end"}}
                ],
                "edges": [
                    {{"from": "start", "to": "work"}},
                    {{"from": "work", "to": "done"}}
                ]}}"#,
            max_attempts
        ))
        .unwrap()
    }

    async fn ready_at(store: &InMemoryStore, position: &str) -> Context {
        let ctx = Context::seed(Uuid::new_v4(), "orders", NodeId::new(position), vec![]);
        store.save_contexts(std::slice::from_ref(&ctx)).await.unwrap();
        store
            .update_status(&[ctx.id()], ContextStatus::New, ContextStatus::Pending)
            .await
            .unwrap();
        store
            .update_status(&[ctx.id()], ContextStatus::Pending, ContextStatus::Ready)
            .await
            .unwrap();
        ctx
    }

    #[tokio::test]
    async fn test_record_failure_parks_with_backoff() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = RetryLedger::new(Arc::clone(&store));
        let definition = definition_with_retry(3);
        let ctx = ready_at(&store, "work").await;

        let verdict = ledger.record_failure(&ctx, &definition).await.unwrap();
        let RetryVerdict::Retryable { attempt, .. } = verdict else {
            panic!("expected retryable, got {:?}", verdict);
        };
        assert_eq!(attempt, 1);

        let fetched = store.get_context(ctx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), ContextStatus::Retryable);
        assert!(!ledger.is_exhausted(&fetched, &definition).await.unwrap());
        assert!(!ledger
            .is_eligible(ctx.id(), Utc::now())
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_exhaustion_terminates() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = RetryLedger::new(Arc::clone(&store));
        let definition = definition_with_retry(1);
        let ctx = ready_at(&store, "work").await;

        let verdict = ledger.record_failure(&ctx, &definition).await.unwrap();
        assert_eq!(verdict, RetryVerdict::Exhausted);

        let fetched = store.get_context(ctx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), ContextStatus::Error);
        assert!(store.get_retry(ctx.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_lost_race_records_nothing() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = RetryLedger::new(Arc::clone(&store));
        let definition = definition_with_retry(3);
        let ctx = ready_at(&store, "work").await;

        // The original owner archives first.
        store.archive_context(ctx.id(), b"").await.unwrap();

        let verdict = ledger.record_failure(&ctx, &definition).await.unwrap();
        assert_eq!(verdict, RetryVerdict::Lost);
        assert!(store.get_retry(ctx.id()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_node_without_policy_fails_immediately() {
        let store = Arc::new(InMemoryStore::new());
        let ledger = RetryLedger::new(Arc::clone(&store));
        let definition = definition_with_retry(3);
        // "done" carries no retry block, so RetryPolicy::NONE applies.
        let ctx = ready_at(&store, "done").await;

        let verdict = ledger.record_failure(&ctx, &definition).await.unwrap();
        assert_eq!(verdict, RetryVerdict::Exhausted);
    }
}
