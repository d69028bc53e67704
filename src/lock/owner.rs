use super::{Result, TraceLocks};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// Default lease TTL.
const DEFAULT_LEASE_TTL: Duration = Duration::from_secs(30);

/// Handler invoked when a trace's lease is lost mid-flight.
pub type InvalidationHandler = Arc<dyn Fn(Uuid) + Send + Sync>;

/// Per-process ownership coordinator over a [`TraceLocks`] backend.
///
/// `OwnerService` answers "may this process advance trace X right now?".
/// A successful [`OwnerService::claim`] returns an [`Ownership`] guard and
/// starts a background task renewing the lease every `renew_interval`.
/// The moment a renew fails — lease expired, reclaimed by another
/// instance, or the lock store unreachable — the guard's cancellation
/// token fires and the registered invalidation handler is called, telling
/// in-flight work to abort rather than keep mutating state it no longer
/// owns.
///
/// # Example
///
/// ```no_run
/// use nostos::lock::{InMemoryTraceLocks, OwnerService};
/// use std::sync::Arc;
/// use uuid::Uuid;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let locks = Arc::new(InMemoryTraceLocks::new());
/// let owner = OwnerService::new(locks, "engine-1")
///     .on_invalidated(|trace_id| eprintln!("lost ownership of {trace_id}"));
///
/// let trace_id = Uuid::new_v4();
/// if let Some(guard) = owner.claim(trace_id).await? {
///     // ... advance the trace's contexts, checking guard.is_valid() ...
///     guard.release().await;
/// }
/// # Ok(())
/// # }
/// ```
pub struct OwnerService<L> {
    locks: Arc<L>,
    owner_id: String,
    lease_ttl: Duration,
    renew_interval: Duration,
    on_invalidated: Option<InvalidationHandler>,
}

impl<L: TraceLocks + 'static> OwnerService<L> {
    /// Creates a coordinator identified as `owner_id` with the default
    /// 30 s lease, renewed at a third of the TTL.
    pub fn new(locks: Arc<L>, owner_id: impl Into<String>) -> Self {
        Self {
            locks,
            owner_id: owner_id.into(),
            lease_ttl: DEFAULT_LEASE_TTL,
            renew_interval: DEFAULT_LEASE_TTL / 3,
            on_invalidated: None,
        }
    }

    /// Sets the lease TTL; the renew interval follows at ttl/3 unless set
    /// explicitly afterwards.
    pub fn with_lease_ttl(mut self, ttl: Duration) -> Self {
        self.lease_ttl = ttl;
        self.renew_interval = ttl / 3;
        self
    }

    /// Sets how often held leases are renewed. Must be comfortably below
    /// the TTL or leases will lapse between renewals.
    pub fn with_renew_interval(mut self, interval: Duration) -> Self {
        self.renew_interval = interval;
        self
    }

    /// Registers the handler called when a claimed trace's lease is lost.
    pub fn on_invalidated(mut self, handler: impl Fn(Uuid) + Send + Sync + 'static) -> Self {
        self.on_invalidated = Some(Arc::new(handler));
        self
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn lease_ttl(&self) -> Duration {
        self.lease_ttl
    }

    /// Attempts to take ownership of a trace.
    ///
    /// Returns `None` when another instance holds the lock — expected
    /// concurrency, not an error. On success the lease is renewed in the
    /// background until the guard is released or dropped.
    ///
    /// # Errors
    /// Propagates lock-store failures; per the fail-closed policy a
    /// failure means "not owned".
    pub async fn claim(&self, trace_id: Uuid) -> Result<Option<Ownership>> {
        if !self
            .locks
            .acquire(trace_id, &self.owner_id, self.lease_ttl)
            .await?
        {
            debug!(trace_id = %trace_id, owner_id = %self.owner_id, "trace already owned elsewhere");
            return Ok(None);
        }

        let token = CancellationToken::new();
        self.spawn_renewal(trace_id, token.clone());

        Ok(Some(Ownership {
            trace_id,
            owner_id: self.owner_id.clone(),
            locks: Arc::clone(&self.locks) as Arc<dyn TraceLocks>,
            token,
        }))
    }

    fn spawn_renewal(&self, trace_id: Uuid, token: CancellationToken) {
        let locks = Arc::clone(&self.locks);
        let owner_id = self.owner_id.clone();
        let ttl = self.lease_ttl;
        let interval = self.renew_interval;
        let handler = self.on_invalidated.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {
                        let renewed = match locks.renew(trace_id, &owner_id, ttl).await {
                            Ok(renewed) => renewed,
                            Err(e) => {
                                // Fail closed: an unreachable lock store
                                // means we cannot prove ownership.
                                warn!(trace_id = %trace_id, error = %e, "lease renewal errored");
                                false
                            }
                        };

                        if !renewed {
                            warn!(
                                trace_id = %trace_id,
                                owner_id = %owner_id,
                                "lease lost, aborting in-flight work"
                            );
                            token.cancel();
                            if let Some(handler) = &handler {
                                handler(trace_id);
                            }
                            break;
                        }
                    }
                }
            }
        });
    }
}

/// Proof of trace ownership, valid while the lease renews.
///
/// Check [`Ownership::is_valid`] before every state mutation: once the
/// token fires, the lease is gone and any further writes would race the
/// next owner.
///
/// Dropping the guard stops renewal and lets the lease lapse naturally;
/// prefer [`Ownership::release`] to free the trace immediately.
pub struct Ownership {
    trace_id: Uuid,
    owner_id: String,
    locks: Arc<dyn TraceLocks>,
    token: CancellationToken,
}

impl Ownership {
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    /// Returns true while the lease is held and renewing.
    pub fn is_valid(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Token that fires when ownership is lost; select against it to
    /// abort long-running work promptly.
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.token
    }

    /// Stops renewal and releases the lock (best effort).
    pub async fn release(self) {
        self.token.cancel();
        if let Err(e) = self.locks.release(self.trace_id, &self.owner_id).await {
            warn!(trace_id = %self.trace_id, error = %e, "failed to release trace lock");
        }
    }
}

impl Drop for Ownership {
    fn drop(&mut self) {
        // Stop the renewal task; the lease expires on its own.
        self.token.cancel();
    }
}
