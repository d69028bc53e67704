use super::{Page, PageRequest, Result, StorageError};
use crate::core::{Context, ContextStatus, RetryRecord, Trace, TraceStatus};
use crate::definition::NodeId;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

/// In-memory context store using DashMap for concurrent access.
///
/// Suitable for testing and single-process development. The distributed
/// properties the SQL backend gets from transactions are provided here by
/// entry-level compare-and-swap on the status column plus a per-trace
/// mutex around composite operations, so the observable semantics match:
/// exactly one racing caller wins a conditional update, and composite
/// mutations apply atomically with respect to other composite mutations
/// of the same trace.
///
/// Note that this backend is only shared within one process; it cannot
/// coordinate a fleet.
#[derive(Default)]
pub struct InMemoryStore {
    contexts: dashmap::DashMap<Uuid, Context>,
    traces: dashmap::DashMap<Uuid, Trace>,
    retries: dashmap::DashMap<Uuid, RetryRecord>,
    /// One gate per trace serializing composite multi-row mutations.
    gates: dashmap::DashMap<Uuid, Arc<Mutex<()>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn gate(&self, trace_id: Uuid) -> Arc<Mutex<()>> {
        self.gates
            .entry(trace_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Recomputes the trace status from its contexts. Call while holding
    /// the trace gate.
    fn recompute_trace_status(&self, trace_id: Uuid) {
        let statuses: Vec<ContextStatus> = self
            .contexts
            .iter()
            .filter(|entry| entry.value().trace_id() == trace_id)
            .map(|entry| entry.value().status())
            .collect();

        let derived = TraceStatus::derive(statuses);
        if let Some(mut trace) = self.traces.get_mut(&trace_id) {
            if trace.status() != derived {
                trace.set_status(derived);
            }
        }
    }

    /// Returns true if an active context other than `exclude` already
    /// occupies `(trace_id, position)`.
    fn position_occupied(&self, trace_id: Uuid, position: &NodeId, exclude: Uuid) -> bool {
        self.contexts.iter().any(|entry| {
            let ctx = entry.value();
            ctx.id() != exclude
                && ctx.trace_id() == trace_id
                && ctx.position() == position
                && !ctx.status().is_terminal()
        })
    }
}

#[async_trait]
impl super::ContextStore for InMemoryStore {
    async fn save_trace(&self, trace: &Trace) -> Result<()> {
        self.traces.insert(trace.trace_id(), trace.clone());
        Ok(())
    }

    async fn get_trace(&self, trace_id: Uuid) -> Result<Option<Trace>> {
        Ok(self.traces.get(&trace_id).map(|entry| entry.clone()))
    }

    async fn save_contexts(&self, contexts: &[Context]) -> Result<()> {
        for context in contexts {
            let _guard = self.gate(context.trace_id()).lock_owned().await;
            if self.position_occupied(context.trace_id(), context.position(), context.id()) {
                return Err(StorageError::DuplicateContext {
                    trace_id: context.trace_id(),
                    position: context.position().clone(),
                });
            }
            self.contexts.insert(context.id(), context.clone());
        }
        Ok(())
    }

    async fn get_context(&self, id: Uuid) -> Result<Option<Context>> {
        Ok(self.contexts.get(&id).map(|entry| entry.clone()))
    }

    async fn contexts_for_trace(&self, trace_id: Uuid) -> Result<Vec<Context>> {
        let mut contexts: Vec<Context> = self
            .contexts
            .iter()
            .filter(|entry| entry.value().trace_id() == trace_id)
            .map(|entry| entry.value().clone())
            .collect();

        contexts.sort_by_key(|ctx| (ctx.created_at(), ctx.id()));
        Ok(contexts)
    }

    async fn update_status(
        &self,
        ids: &[Uuid],
        from: ContextStatus,
        to: ContextStatus,
    ) -> Result<u64> {
        if !to.valid_from(from) {
            return Err(StorageError::InvalidTransition { from, to });
        }

        let mut updated = 0;
        for id in ids {
            // The entry guard makes each row's check-and-set atomic.
            if let Some(mut entry) = self.contexts.get_mut(id) {
                if entry.status() == from {
                    entry.set_status(to);
                    updated += 1;
                }
            }
        }
        Ok(updated)
    }

    async fn contexts_by_status(
        &self,
        stream_id: &str,
        statuses: &[ContextStatus],
        page: PageRequest,
    ) -> Result<Page<Context>> {
        let mut items: Vec<Context> = self
            .contexts
            .iter()
            .filter(|entry| {
                let ctx = entry.value();
                ctx.stream_id() == stream_id
                    && statuses.contains(&ctx.status())
                    && page.after.is_none_or(|after| ctx.id() > after)
            })
            .map(|entry| entry.value().clone())
            .collect();

        items.sort_by_key(|ctx| ctx.id());
        items.truncate(page.limit);

        let next = if items.len() == page.limit {
            items.last().map(|ctx| ctx.id())
        } else {
            None
        };

        Ok(Page { items, next })
    }

    async fn active_streams(&self) -> Result<Vec<String>> {
        let mut streams: Vec<String> = self
            .contexts
            .iter()
            .filter(|entry| !entry.value().status().is_terminal())
            .map(|entry| entry.value().stream_id().to_string())
            .collect();

        streams.sort();
        streams.dedup();
        Ok(streams)
    }

    async fn advance_context(
        &self,
        id: Uuid,
        successors: &[NodeId],
        batch: i64,
        data: &[u8],
    ) -> Result<Option<Vec<Context>>> {
        if successors.is_empty() {
            return Err(StorageError::InvalidParameter(
                "advance requires at least one successor".to_string(),
            ));
        }

        let Some(trace_id) = self.contexts.get(&id).map(|e| e.trace_id()) else {
            return Err(StorageError::ContextNotFound(id));
        };
        let _guard = self.gate(trace_id).lock_owned().await;

        let Some(current) = self.contexts.get(&id).map(|e| e.clone()) else {
            return Err(StorageError::ContextNotFound(id));
        };
        if current.status() != ContextStatus::Ready {
            return Ok(None);
        }

        // The moved context and every spawned sibling must land on a free
        // position; the context itself vacates its old one.
        for position in successors {
            if self.position_occupied(trace_id, position, id) {
                return Err(StorageError::DuplicateContext {
                    trace_id,
                    position: position.clone(),
                });
            }
        }

        let mut moved = current.clone();
        moved.set_position(successors[0].clone());
        moved.set_status(ContextStatus::Pending);
        moved.set_to_batch(batch);
        moved.set_data(data.to_vec());

        let mut results = vec![moved.clone()];
        for position in &successors[1..] {
            let sibling = Context::sibling(&moved, position.clone(), batch, data.to_vec());
            results.push(sibling);
        }

        for context in &results {
            self.contexts.insert(context.id(), context.clone());
        }

        Ok(Some(results))
    }

    async fn archive_context(&self, id: Uuid, data: &[u8]) -> Result<bool> {
        let Some(trace_id) = self.contexts.get(&id).map(|e| e.trace_id()) else {
            return Err(StorageError::ContextNotFound(id));
        };
        let _guard = self.gate(trace_id).lock_owned().await;

        {
            let Some(mut entry) = self.contexts.get_mut(&id) else {
                return Err(StorageError::ContextNotFound(id));
            };
            if entry.status() != ContextStatus::Ready {
                return Ok(false);
            }
            entry.set_status(ContextStatus::Archived);
            entry.set_data(data.to_vec());
        }

        self.retries.remove(&id);
        self.recompute_trace_status(trace_id);
        Ok(true)
    }

    async fn park_retryable(
        &self,
        id: Uuid,
        next_eligible: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let Some(trace_id) = self.contexts.get(&id).map(|e| e.trace_id()) else {
            return Err(StorageError::ContextNotFound(id));
        };
        let _guard = self.gate(trace_id).lock_owned().await;

        let attempts = {
            let Some(mut entry) = self.contexts.get_mut(&id) else {
                return Err(StorageError::ContextNotFound(id));
            };
            if entry.status() != ContextStatus::Ready {
                return Ok(None);
            }
            entry.set_status(ContextStatus::Retryable);
            entry.increment_retry_count();
            entry.retry_count()
        };

        self.retries
            .insert(id, RetryRecord::new(id, attempts, next_eligible));
        Ok(Some(attempts))
    }

    async fn requeue_retryable(&self, id: Uuid) -> Result<bool> {
        let Some(trace_id) = self.contexts.get(&id).map(|e| e.trace_id()) else {
            return Err(StorageError::ContextNotFound(id));
        };
        let _guard = self.gate(trace_id).lock_owned().await;

        let Some(mut entry) = self.contexts.get_mut(&id) else {
            return Err(StorageError::ContextNotFound(id));
        };
        if entry.status() != ContextStatus::Retryable {
            return Ok(false);
        }
        entry.set_status(ContextStatus::Pending);
        Ok(true)
    }

    async fn fail_context(&self, id: Uuid) -> Result<bool> {
        let Some(trace_id) = self.contexts.get(&id).map(|e| e.trace_id()) else {
            return Err(StorageError::ContextNotFound(id));
        };
        let _guard = self.gate(trace_id).lock_owned().await;

        {
            let Some(mut entry) = self.contexts.get_mut(&id) else {
                return Err(StorageError::ContextNotFound(id));
            };
            if entry.status() != ContextStatus::Retryable {
                return Ok(false);
            }
            entry.set_status(ContextStatus::Error);
        }

        self.retries.remove(&id);
        self.recompute_trace_status(trace_id);
        Ok(true)
    }

    async fn get_retry(&self, context_id: Uuid) -> Result<Option<RetryRecord>> {
        Ok(self.retries.get(&context_id).map(|entry| entry.clone()))
    }

    async fn reset(&self) -> Result<()> {
        self.contexts.clear();
        self.traces.clear();
        self.retries.clear();
        self.gates.clear();
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::ContextStore;
    use super::*;

    fn seed(trace_id: Uuid, position: &str) -> Context {
        Context::seed(trace_id, "orders", NodeId::new(position), vec![])
    }

    async fn ready_context(store: &InMemoryStore, trace_id: Uuid, position: &str) -> Context {
        let ctx = seed(trace_id, position);
        store.save_trace(&Trace::new(trace_id, "orders")).await.unwrap();
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
    async fn test_save_and_get_round_trip() {
        let store = InMemoryStore::new();
        let trace_id = Uuid::new_v4();
        let ctx = seed(trace_id, "start");

        store.save_contexts(std::slice::from_ref(&ctx)).await.unwrap();

        let fetched = store.get_context(ctx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.id(), ctx.id());
        assert_eq!(fetched.trace_id(), trace_id);
        assert_eq!(fetched.position(), &NodeId::new("start"));
        assert_eq!(fetched.status(), ContextStatus::New);
        assert_eq!(fetched.to_batch(), 0);
        assert_eq!(fetched.created_at(), ctx.created_at());
    }

    #[tokio::test]
    async fn test_duplicate_active_position_rejected() {
        let store = InMemoryStore::new();
        let trace_id = Uuid::new_v4();

        store.save_contexts(&[seed(trace_id, "start")]).await.unwrap();
        let result = store.save_contexts(&[seed(trace_id, "start")]).await;

        assert!(matches!(
            result,
            Err(StorageError::DuplicateContext { .. })
        ));

        // A different trace may reuse the position.
        store
            .save_contexts(&[seed(Uuid::new_v4(), "start")])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_update_status_cas() {
        let store = InMemoryStore::new();
        let ctx = seed(Uuid::new_v4(), "start");
        store.save_contexts(std::slice::from_ref(&ctx)).await.unwrap();

        let updated = store
            .update_status(&[ctx.id()], ContextStatus::New, ContextStatus::Pending)
            .await
            .unwrap();
        assert_eq!(updated, 1);

        // Second identical transition loses the swap: count 0, no error.
        let updated = store
            .update_status(&[ctx.id()], ContextStatus::New, ContextStatus::Pending)
            .await
            .unwrap();
        assert_eq!(updated, 0);
    }

    #[tokio::test]
    async fn test_update_status_rejects_invalid_transition() {
        let store = InMemoryStore::new();
        let result = store
            .update_status(&[Uuid::new_v4()], ContextStatus::New, ContextStatus::Archived)
            .await;
        assert!(matches!(
            result,
            Err(StorageError::InvalidTransition { .. })
        ));
    }

    #[tokio::test]
    async fn test_paged_scan_is_stable() {
        let store = InMemoryStore::new();
        let trace_id = Uuid::new_v4();
        for i in 0..7 {
            store
                .save_contexts(&[seed(trace_id, &format!("n{}", i))])
                .await
                .unwrap();
        }

        let mut seen = Vec::new();
        let mut page = store
            .contexts_by_status("orders", &[ContextStatus::New], PageRequest::first(3))
            .await
            .unwrap();
        loop {
            seen.extend(page.items.iter().map(|c| c.id()));
            let Some(cursor) = page.next else { break };
            page = store
                .contexts_by_status(
                    "orders",
                    &[ContextStatus::New],
                    PageRequest::after(cursor, 3),
                )
                .await
                .unwrap();
        }

        assert_eq!(seen.len(), 7);
        let mut deduped = seen.clone();
        deduped.sort();
        deduped.dedup();
        assert_eq!(deduped.len(), 7, "no context skipped or duplicated");
    }

    #[tokio::test]
    async fn test_advance_moves_and_spawns_siblings() {
        let store = InMemoryStore::new();
        let trace_id = Uuid::new_v4();
        let ctx = ready_context(&store, trace_id, "start").await;

        let results = store
            .advance_context(
                ctx.id(),
                &[NodeId::new("left"), NodeId::new("right")],
                1,
                b"{}",
            )
            .await
            .unwrap()
            .unwrap();

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].id(), ctx.id());
        assert_eq!(results[0].position(), &NodeId::new("left"));
        assert_eq!(results[0].status(), ContextStatus::Pending);
        assert_eq!(results[0].to_batch(), 1);
        assert_eq!(results[1].position(), &NodeId::new("right"));
        assert_eq!(results[1].to_batch(), 1);
        assert_eq!(results[1].trace_id(), trace_id);

        // Lost race: the context is no longer Ready.
        let second = store
            .advance_context(ctx.id(), &[NodeId::new("left")], 2, b"{}")
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_archive_clears_retry_and_completes_trace() {
        let store = InMemoryStore::new();
        let trace_id = Uuid::new_v4();
        let ctx = ready_context(&store, trace_id, "start").await;

        assert!(store.archive_context(ctx.id(), b"42").await.unwrap());

        let fetched = store.get_context(ctx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), ContextStatus::Archived);
        assert_eq!(fetched.data(), b"42");
        assert!(store.get_retry(ctx.id()).await.unwrap().is_none());

        let trace = store.get_trace(trace_id).await.unwrap().unwrap();
        assert_eq!(trace.status(), TraceStatus::Complete);

        // Archiving again loses the swap.
        assert!(!store.archive_context(ctx.id(), b"42").await.unwrap());
    }

    #[tokio::test]
    async fn test_park_and_fail_lifecycle() {
        let store = InMemoryStore::new();
        let trace_id = Uuid::new_v4();
        let ctx = ready_context(&store, trace_id, "start").await;

        let eligible = Utc::now() + chrono::Duration::seconds(1);
        let attempts = store
            .park_retryable(ctx.id(), eligible)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(attempts, 1);

        let record = store.get_retry(ctx.id()).await.unwrap().unwrap();
        assert_eq!(record.attempts, 1);
        assert_eq!(record.next_eligible, eligible);
        let fetched = store.get_context(ctx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), ContextStatus::Retryable);
        assert_eq!(fetched.retry_count(), 1);

        assert!(store.fail_context(ctx.id()).await.unwrap());
        let fetched = store.get_context(ctx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), ContextStatus::Error);
        assert!(store.get_retry(ctx.id()).await.unwrap().is_none());

        let trace = store.get_trace(trace_id).await.unwrap().unwrap();
        assert_eq!(trace.status(), TraceStatus::Failed);
    }

    #[tokio::test]
    async fn test_requeue_retryable() {
        let store = InMemoryStore::new();
        let ctx = ready_context(&store, Uuid::new_v4(), "start").await;
        store
            .park_retryable(ctx.id(), Utc::now())
            .await
            .unwrap()
            .unwrap();

        assert!(store.requeue_retryable(ctx.id()).await.unwrap());
        let fetched = store.get_context(ctx.id()).await.unwrap().unwrap();
        assert_eq!(fetched.status(), ContextStatus::Pending);
        // The record survives until the context terminates.
        assert!(store.get_retry(ctx.id()).await.unwrap().is_some());

        assert!(!store.requeue_retryable(ctx.id()).await.unwrap());
    }

    #[tokio::test]
    async fn test_active_streams() {
        let store = InMemoryStore::new();
        let ctx = seed(Uuid::new_v4(), "start");
        store.save_contexts(std::slice::from_ref(&ctx)).await.unwrap();

        assert_eq!(store.active_streams().await.unwrap(), vec!["orders"]);

        store
            .update_status(&[ctx.id()], ContextStatus::New, ContextStatus::Pending)
            .await
            .unwrap();
        store
            .update_status(&[ctx.id()], ContextStatus::Pending, ContextStatus::Ready)
            .await
            .unwrap();
        store.archive_context(ctx.id(), b"").await.unwrap();

        assert!(store.active_streams().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_cas_single_winner() {
        let store = Arc::new(InMemoryStore::new());
        let ctx = seed(Uuid::new_v4(), "start");
        store.save_contexts(std::slice::from_ref(&ctx)).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..8 {
            let store = Arc::clone(&store);
            let id = ctx.id();
            handles.push(tokio::spawn(async move {
                store
                    .update_status(&[id], ContextStatus::New, ContextStatus::Pending)
                    .await
                    .unwrap()
            }));
        }

        let mut total = 0;
        for handle in handles {
            total += handle.await.unwrap();
        }
        assert_eq!(total, 1, "exactly one concurrent caller wins the swap");
    }
}
