//! The crash-recovery control loop.
//!
//! Every engine instance runs one `RestartSchedule` on a fixed interval.
//! A pass scans for non-terminal contexts of live streams, claims their
//! traces through the ownership protocol, re-validates every context with
//! conditional updates, and hands the re-admitted work back to the normal
//! execution path. Instances that lose the lock race simply skip the
//! trace — that is the mechanism that keeps concurrent recovery passes
//! from duplicating effort.

use crate::core::{ContextStatus, TraceStatus};
use crate::definition::Registry;
use crate::executor::{ExecutionError, Executor, NodeExecutor, Result};
use crate::lock::{OwnerService, Ownership, TraceLocks};
use crate::retry::{RetryLedger, RetryVerdict};
use crate::storage::{ContextStore, PageRequest, DEFAULT_PAGE_SIZE};
use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Default interval between recovery passes.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Summary of one recovery pass.
#[derive(Debug, Default, Clone)]
pub struct RestartReport {
    /// Distinct traces holding non-terminal contexts on live streams.
    pub traces_scanned: usize,
    /// Traces this instance claimed and recovered.
    pub traces_recovered: usize,
    /// Traces owned (or being recovered) by another instance.
    pub traces_skipped: usize,
    /// Traces whose recovery errored; retried on the next pass.
    pub traces_failed: usize,
    /// Node executions performed while draining re-admitted work.
    pub contexts_readmitted: usize,
    /// Contexts terminated `Error` because their retry budget was gone.
    pub contexts_failed: usize,
    /// Streams with interrupted work but no resolvable definition. Their
    /// contexts are reported, never force-terminated.
    pub unresolved_streams: Vec<String>,
}

struct TraceRecovery {
    executed: usize,
    failed: usize,
}

/// Periodic scan-and-reclaim job re-admitting work abandoned by crashed
/// owners.
///
/// # Lifecycle
/// 1. Create: `RestartSchedule::new(store, owner, registry, executor)`
/// 2. Configure: `.with_poll_interval(..)`, `.with_page_size(..)`
/// 3. Start: `.start()` returns a [`RestartHandle`]
/// 4. Shutdown: `handle.shutdown().await`
///
/// [`RestartSchedule::restart_interrupted`] can also be invoked directly —
/// it is idempotent and safe to call repeatedly or concurrently from any
/// number of processes; the trace locks arbitrate.
pub struct RestartSchedule<S, L, N> {
    store: Arc<S>,
    owner: Arc<OwnerService<L>>,
    registry: Arc<Registry>,
    executor: Arc<Executor<S, N>>,
    ledger: RetryLedger<S>,
    poll_interval: Duration,
    page_size: usize,
    shutdown: Arc<AtomicBool>,
}

impl<S, L, N> RestartSchedule<S, L, N>
where
    S: ContextStore + 'static,
    L: TraceLocks + 'static,
    N: NodeExecutor + 'static,
{
    pub fn new(
        store: Arc<S>,
        owner: Arc<OwnerService<L>>,
        registry: Arc<Registry>,
        executor: Arc<Executor<S, N>>,
    ) -> Self {
        Self {
            ledger: RetryLedger::new(Arc::clone(&store)),
            store,
            owner,
            registry,
            executor,
            poll_interval: DEFAULT_POLL_INTERVAL,
            page_size: DEFAULT_PAGE_SIZE,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Sets the interval between passes.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Sets the scan batch size. Bounds memory use on large backlogs.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Starts the schedule in a background task.
    pub fn start(self) -> RestartHandle {
        let shutdown = Arc::clone(&self.shutdown);
        let handle = tokio::spawn(async move {
            self.run().await;
        });
        RestartHandle { handle, shutdown }
    }

    async fn run(self) {
        info!(
            poll_interval = ?self.poll_interval,
            owner_id = %self.owner.owner_id(),
            "restart schedule started"
        );

        while !self.shutdown.load(Ordering::SeqCst) {
            match self.restart_interrupted().await {
                Ok(report) => {
                    if report.traces_recovered > 0 || !report.unresolved_streams.is_empty() {
                        info!(
                            recovered = report.traces_recovered,
                            skipped = report.traces_skipped,
                            readmitted = report.contexts_readmitted,
                            unresolved = report.unresolved_streams.len(),
                            "recovery pass complete"
                        );
                    }
                }
                Err(e) => {
                    // Transient infrastructure failure; the next pass retries.
                    error!(error = %e, "recovery pass failed");
                }
            }

            tokio::time::sleep(self.poll_interval).await;
        }

        info!("restart schedule stopped");
    }

    /// One recovery pass. Idempotent under concurrent invocation: a trace
    /// is recovered by whichever caller wins its lock; everyone else
    /// observes acquisition failure and mutates nothing.
    pub async fn restart_interrupted(&self) -> Result<RestartReport> {
        let mut report = RestartReport::default();

        let traces = self.scan_interrupted(&mut report).await?;
        report.traces_scanned = traces.len();

        for trace_id in traces {
            match self.recover_trace(trace_id).await {
                Ok(Some(outcome)) => {
                    report.traces_recovered += 1;
                    report.contexts_readmitted += outcome.executed;
                    report.contexts_failed += outcome.failed;
                }
                Ok(None) => {
                    report.traces_skipped += 1;
                }
                // One trace's failure never aborts recovery of the rest.
                Err(e) => {
                    warn!(trace_id = %trace_id, error = %e, "trace recovery failed");
                    report.traces_failed += 1;
                }
            }
        }

        Ok(report)
    }

    /// Pages through every live stream's non-terminal contexts and
    /// collects the distinct traces to recover.
    async fn scan_interrupted(&self, report: &mut RestartReport) -> Result<BTreeSet<Uuid>> {
        let mut traces = BTreeSet::new();

        for stream_id in self.store.active_streams().await? {
            if !self.registry.contains(&stream_id) {
                // Recovery needs the definition to reinterpret readiness;
                // without it the contexts stay put for an operator.
                warn!(
                    stream_id = %stream_id,
                    "interrupted contexts on stream without a resolvable definition"
                );
                report.unresolved_streams.push(stream_id);
                continue;
            }

            let mut page = PageRequest::first(self.page_size);
            loop {
                let result = self
                    .store
                    .contexts_by_status(&stream_id, &ContextStatus::NON_TERMINAL, page)
                    .await?;
                traces.extend(result.items.iter().map(|ctx| ctx.trace_id()));
                match result.next {
                    Some(cursor) => page = PageRequest::after(cursor, self.page_size),
                    None => break,
                }
            }
        }

        Ok(traces)
    }

    /// Claims and recovers one trace. `None` means another instance owns
    /// it. The lock is released before returning, pass or fail.
    async fn recover_trace(&self, trace_id: Uuid) -> Result<Option<TraceRecovery>> {
        let Some(guard) = self.owner.claim(trace_id).await? else {
            debug!(trace_id = %trace_id, "trace owned elsewhere, skipping");
            return Ok(None);
        };

        let outcome = self.readmit_and_drive(&guard).await;
        guard.release().await;
        outcome.map(Some)
    }

    async fn readmit_and_drive(&self, guard: &Ownership) -> Result<TraceRecovery> {
        let trace_id = guard.trace_id();
        let mut outcome = TraceRecovery {
            executed: 0,
            failed: 0,
        };

        // Re-validate under ownership: the original owner may have finished
        // between the scan and the claim.
        let contexts = self.store.contexts_for_trace(trace_id).await?;
        if contexts.iter().all(|ctx| ctx.status().is_terminal()) {
            debug!(trace_id = %trace_id, "nothing to recover");
            return Ok(outcome);
        }

        let trace = self
            .store
            .get_trace(trace_id)
            .await?
            .ok_or(crate::storage::StorageError::TraceNotFound(trace_id))?;
        let definition = self.registry.resolve(trace.stream_id())?;

        // A Ready survivor may have been mid-execution when its owner
        // died; re-running it blindly could duplicate side effects. It
        // becomes eligible for re-execution at the cost of one retry
        // attempt — or terminates if that was the last one.
        for ctx in contexts
            .iter()
            .filter(|ctx| ctx.status() == ContextStatus::Ready)
        {
            if !guard.is_valid() {
                return Err(ExecutionError::OwnershipLost(trace_id));
            }
            match self.ledger.record_failure(ctx, &definition).await? {
                RetryVerdict::Exhausted => outcome.failed += 1,
                RetryVerdict::Retryable { attempt, .. } => {
                    debug!(
                        context_id = %ctx.id(),
                        attempt,
                        "interrupted context parked for re-execution"
                    );
                }
                RetryVerdict::Lost => {
                    debug!(context_id = %ctx.id(), "context completed by original owner");
                }
            }
        }

        // New/Pending claiming, retryable re-admission, readiness
        // evaluation, and execution are the normal path's job.
        outcome.executed = self.executor.drive_trace(guard).await?;

        if let Some(trace) = self.store.get_trace(trace_id).await? {
            if trace.status() == TraceStatus::Failed {
                warn!(trace_id = %trace_id, "trace failed terminally during recovery");
            }
        }

        Ok(outcome)
    }
}

/// Handle for stopping the restart schedule.
pub struct RestartHandle {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
}

impl RestartHandle {
    /// Gracefully stops the schedule: signals shutdown and waits for the
    /// in-flight pass to finish.
    pub async fn shutdown(self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _ = self.handle.await;
    }
}
