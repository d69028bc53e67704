//! Crash-recovery behavior of the restart schedule.
//!
//! These tests verify:
//! 1. Contexts stranded in NEW/PENDING by a crashed owner are advanced
//!    through the flow to completion
//! 2. A context stranded in READY is parked for re-execution, consuming
//!    one retry attempt
//! 3. Concurrent recovery passes recover each trace exactly once
//! 4. Retry exhaustion terminates a context and removes it from
//!    subsequent scans

use async_trait::async_trait;
use nostos::prelude::*;
use std::time::Duration;

const ECHO_STREAM: &str = "flows_auto_echo_state_node_1_to_1";

const ECHO_DOC: &str = r#"{
    "version": 1,
    "stream_id": "flows_auto_echo_state_node_1_to_1",
    "nodes": [
        {"id": "start", "kind": "start"},
        {"id": "state1", "kind": "state",
         "retry": {"max_attempts": 3, "backoff": "exponential",
                   "initial_delay_ms": 1000, "max_delay_ms": 30000, "multiplier": 2.0}},
        {"id": "state2", "kind": "end"}
    ],
    "edges": [
        {"from": "start", "to": "state1"},
        {"from": "state1", "to": "state2"}
    ]
}"#;

/// Passes the payload through unchanged, optionally sleeping first so a
/// test can hold trace ownership for a deterministic window.
struct EchoNode {
    delay: Duration,
}

impl EchoNode {
    fn new() -> Self {
        Self {
            delay: Duration::ZERO,
        }
    }

    fn slow(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl NodeExecutor for EchoNode {
    async fn execute(
        &self,
        _node: &NodeSpec,
        _context: &Context,
    ) -> Result<Option<Vec<u8>>, BoxError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(None)
    }
}

struct Engine {
    store: Arc<InMemoryStore>,
    schedule: RestartSchedule<InMemoryStore, InMemoryTraceLocks, EchoNode>,
}

fn engine(owner_id: &str, node: EchoNode) -> Engine {
    let store = Arc::new(InMemoryStore::new());
    let locks = Arc::new(InMemoryTraceLocks::new());
    engine_sharing(owner_id, node, store, locks)
}

/// Builds an engine instance over shared storage and locks, the way a
/// fleet shares one database and one coordination service.
fn engine_sharing(
    owner_id: &str,
    node: EchoNode,
    store: Arc<InMemoryStore>,
    locks: Arc<InMemoryTraceLocks>,
) -> Engine {
    let registry = Arc::new(Registry::new());
    registry.publish_json(ECHO_DOC).unwrap();

    let owner = Arc::new(OwnerService::new(locks, owner_id));
    let executor = Arc::new(Executor::new(
        Arc::clone(&store),
        Arc::clone(&registry),
        Arc::new(node),
    ));
    let schedule = RestartSchedule::new(Arc::clone(&store), owner, registry, executor);

    Engine { store, schedule }
}

/// Persists a trace whose context a crashed owner left at `state1` in the
/// given status.
async fn strand_context(store: &InMemoryStore, status: ContextStatus) -> (Uuid, Uuid) {
    let trace_id = Uuid::new_v4();
    store
        .save_trace(&Trace::new(trace_id, ECHO_STREAM))
        .await
        .unwrap();

    let ctx = Context::seed(trace_id, ECHO_STREAM, NodeId::new("state1"), b"{}".to_vec());
    let id = ctx.id();
    store.save_contexts(&[ctx]).await.unwrap();

    if matches!(status, ContextStatus::Pending | ContextStatus::Ready) {
        store
            .update_status(&[id], ContextStatus::New, ContextStatus::Pending)
            .await
            .unwrap();
    }
    if status == ContextStatus::Ready {
        store
            .update_status(&[id], ContextStatus::Pending, ContextStatus::Ready)
            .await
            .unwrap();
    }

    (trace_id, id)
}

#[tokio::test]
async fn test_new_context_recovers_to_archived() {
    let engine = engine("engine-1", EchoNode::new());
    let (trace_id, id) = strand_context(&engine.store, ContextStatus::New).await;

    let report = engine.schedule.restart_interrupted().await.unwrap();
    assert_eq!(report.traces_recovered, 1);

    let ctx = engine.store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Archived);
    assert_eq!(ctx.position(), &NodeId::new("state2"));

    let trace = engine.store.get_trace(trace_id).await.unwrap().unwrap();
    assert_eq!(trace.status(), TraceStatus::Complete);
}

#[tokio::test]
async fn test_pending_context_recovers_to_archived() {
    let engine = engine("engine-1", EchoNode::new());
    let (trace_id, id) = strand_context(&engine.store, ContextStatus::Pending).await;

    engine.schedule.restart_interrupted().await.unwrap();

    let ctx = engine.store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Archived);
    assert_eq!(ctx.position(), &NodeId::new("state2"));

    let trace = engine.store.get_trace(trace_id).await.unwrap().unwrap();
    assert_eq!(trace.status(), TraceStatus::Complete);
}

#[tokio::test]
async fn test_ready_context_recovers_to_retryable() {
    // A READY survivor may have been mid-execution at the crash, so it is
    // parked rather than blindly re-run, consuming one retry attempt.
    let engine = engine("engine-1", EchoNode::new());
    let (trace_id, id) = strand_context(&engine.store, ContextStatus::Ready).await;

    let report = engine.schedule.restart_interrupted().await.unwrap();
    assert_eq!(report.traces_recovered, 1);

    let ctx = engine.store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Retryable);
    assert_eq!(ctx.position(), &NodeId::new("state1"));
    assert_eq!(ctx.retry_count(), 1);

    let record = engine.store.get_retry(id).await.unwrap().unwrap();
    assert_eq!(record.attempts, 1);
    assert!(record.next_eligible > chrono::Utc::now());

    let trace = engine.store.get_trace(trace_id).await.unwrap().unwrap();
    assert_eq!(trace.status(), TraceStatus::Running);
}

#[tokio::test]
async fn test_concurrent_passes_recover_exactly_once() {
    let store = Arc::new(InMemoryStore::new());
    let locks = Arc::new(InMemoryTraceLocks::new());

    // Slow nodes keep the winner holding the lock long enough that the
    // loser's claim deterministically fails.
    let a = engine_sharing(
        "engine-1",
        EchoNode::slow(Duration::from_millis(100)),
        Arc::clone(&store),
        Arc::clone(&locks),
    );
    let b = engine_sharing(
        "engine-2",
        EchoNode::slow(Duration::from_millis(100)),
        Arc::clone(&store),
        Arc::clone(&locks),
    );

    let (_trace_id, id) = strand_context(&store, ContextStatus::Pending).await;

    let (report_a, report_b) = tokio::join!(
        a.schedule.restart_interrupted(),
        b.schedule.restart_interrupted(),
    );
    let report_a = report_a.unwrap();
    let report_b = report_b.unwrap();

    // One instance recovered the trace, the other observed acquisition
    // failure and mutated nothing.
    assert_eq!(report_a.traces_recovered + report_b.traces_recovered, 1);
    assert_eq!(report_a.traces_skipped + report_b.traces_skipped, 1);

    // state1 and state2 each executed exactly once across the fleet.
    assert_eq!(
        report_a.contexts_readmitted + report_b.contexts_readmitted,
        2
    );

    let ctx = store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Archived);
    assert_eq!(ctx.position(), &NodeId::new("state2"));
}

#[tokio::test]
async fn test_repeated_invocation_is_idempotent() {
    let engine = engine("engine-1", EchoNode::new());
    let (_trace_id, id) = strand_context(&engine.store, ContextStatus::New).await;

    engine.schedule.restart_interrupted().await.unwrap();
    let second = engine.schedule.restart_interrupted().await.unwrap();

    // Everything terminal: the second pass finds nothing to do.
    assert_eq!(second.traces_scanned, 0);
    assert_eq!(second.traces_recovered, 0);

    let ctx = engine.store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Archived);
}

#[tokio::test]
async fn test_exhausted_context_terminates_and_leaves_scans() {
    let engine = engine("engine-1", EchoNode::new());
    let (trace_id, id) = strand_context(&engine.store, ContextStatus::Ready).await;

    // Two earlier crash/retry cycles already consumed attempts.
    for _ in 0..2 {
        engine
            .store
            .park_retryable(id, chrono::Utc::now())
            .await
            .unwrap()
            .unwrap();
        engine.store.requeue_retryable(id).await.unwrap();
        engine
            .store
            .update_status(&[id], ContextStatus::Pending, ContextStatus::Ready)
            .await
            .unwrap();
    }

    // This pass parks the third attempt, which exhausts the budget.
    let report = engine.schedule.restart_interrupted().await.unwrap();
    assert_eq!(report.contexts_failed, 1);

    let ctx = engine.store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Error);
    assert!(engine.store.get_retry(id).await.unwrap().is_none());

    let trace = engine.store.get_trace(trace_id).await.unwrap().unwrap();
    assert_eq!(trace.status(), TraceStatus::Failed);

    // Terminal contexts are excluded from subsequent recovery scans.
    let next = engine.schedule.restart_interrupted().await.unwrap();
    assert_eq!(next.traces_scanned, 0);
}

#[tokio::test]
async fn test_retryable_context_waits_out_backoff() {
    let engine = engine("engine-1", EchoNode::new());
    let (_trace_id, id) = strand_context(&engine.store, ContextStatus::Ready).await;

    // First pass parks the context with a 1s backoff.
    engine.schedule.restart_interrupted().await.unwrap();
    let ctx = engine.store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Retryable);

    // A pass inside the backoff window leaves it parked.
    let report = engine.schedule.restart_interrupted().await.unwrap();
    assert_eq!(report.traces_recovered, 1);
    let ctx = engine.store.get_context(id).await.unwrap().unwrap();
    assert_eq!(ctx.status(), ContextStatus::Retryable);
    assert_eq!(ctx.retry_count(), 1, "waiting never consumes attempts");
}
