use super::{LockInfo, Result, TraceLocks};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone)]
struct LeaseRecord {
    owner_id: String,
    lease_expiry: DateTime<Utc>,
}

/// In-memory trace locks using DashMap entry-level atomicity.
///
/// The entry guard serializes all mutations of one trace's lock record,
/// which gives the same exactly-one-winner semantics as the SQL backend's
/// conditional upsert. Only suitable within a single process; a fleet
/// needs a shared backend.
#[derive(Default)]
pub struct InMemoryTraceLocks {
    locks: DashMap<Uuid, LeaseRecord>,
}

impl InMemoryTraceLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn expiry(ttl: Duration) -> DateTime<Utc> {
        Utc::now() + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero())
    }
}

#[async_trait]
impl TraceLocks for InMemoryTraceLocks {
    async fn acquire(&self, trace_id: Uuid, owner_id: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        match self.locks.entry(trace_id) {
            Entry::Vacant(entry) => {
                entry.insert(LeaseRecord {
                    owner_id: owner_id.to_string(),
                    lease_expiry: Self::expiry(ttl),
                });
                Ok(true)
            }
            Entry::Occupied(mut entry) => {
                let record = entry.get();
                if record.lease_expiry <= now || record.owner_id == owner_id {
                    entry.insert(LeaseRecord {
                        owner_id: owner_id.to_string(),
                        lease_expiry: Self::expiry(ttl),
                    });
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
        }
    }

    async fn renew(&self, trace_id: Uuid, owner_id: &str, ttl: Duration) -> Result<bool> {
        let now = Utc::now();
        if let Some(mut record) = self.locks.get_mut(&trace_id) {
            if record.owner_id == owner_id && record.lease_expiry > now {
                record.lease_expiry = Self::expiry(ttl);
                return Ok(true);
            }
        }
        Ok(false)
    }

    async fn release(&self, trace_id: Uuid, owner_id: &str) -> Result<()> {
        self.locks
            .remove_if(&trace_id, |_, record| record.owner_id == owner_id);
        Ok(())
    }

    async fn holder(&self, trace_id: Uuid) -> Result<Option<LockInfo>> {
        Ok(self.locks.get(&trace_id).map(|record| LockInfo {
            trace_id,
            owner_id: record.owner_id.clone(),
            lease_expiry: record.lease_expiry,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let locks = InMemoryTraceLocks::new();
        let trace_id = Uuid::new_v4();
        let ttl = Duration::from_secs(5);

        assert!(locks.acquire(trace_id, "engine-1", ttl).await.unwrap());
        assert!(!locks.acquire(trace_id, "engine-2", ttl).await.unwrap());
        // Re-entrant for the holder.
        assert!(locks.acquire(trace_id, "engine-1", ttl).await.unwrap());
    }

    #[tokio::test]
    async fn test_expired_lease_is_reclaimable() {
        let locks = InMemoryTraceLocks::new();
        let trace_id = Uuid::new_v4();

        assert!(locks
            .acquire(trace_id, "engine-1", Duration::from_millis(30))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(locks
            .acquire(trace_id, "engine-2", Duration::from_secs(5))
            .await
            .unwrap());

        let holder = locks.holder(trace_id).await.unwrap().unwrap();
        assert_eq!(holder.owner_id, "engine-2");
    }

    #[tokio::test]
    async fn test_renew_fences_stale_owner() {
        let locks = InMemoryTraceLocks::new();
        let trace_id = Uuid::new_v4();

        assert!(locks
            .acquire(trace_id, "engine-1", Duration::from_millis(30))
            .await
            .unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;

        // Expired: the old owner can no longer renew.
        assert!(!locks
            .renew(trace_id, "engine-1", Duration::from_secs(5))
            .await
            .unwrap());

        // Reclaimed by someone else: still fenced.
        assert!(locks
            .acquire(trace_id, "engine-2", Duration::from_secs(5))
            .await
            .unwrap());
        assert!(!locks
            .renew(trace_id, "engine-1", Duration::from_secs(5))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_release_is_idempotent_and_scoped() {
        let locks = InMemoryTraceLocks::new();
        let trace_id = Uuid::new_v4();
        let ttl = Duration::from_secs(5);

        locks.acquire(trace_id, "engine-1", ttl).await.unwrap();

        // Releasing someone else's lock is a no-op.
        locks.release(trace_id, "engine-2").await.unwrap();
        assert!(locks.holder(trace_id).await.unwrap().is_some());

        locks.release(trace_id, "engine-1").await.unwrap();
        assert!(locks.holder(trace_id).await.unwrap().is_none());
        locks.release(trace_id, "engine-1").await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_acquire_single_winner() {
        let locks = Arc::new(InMemoryTraceLocks::new());
        let trace_id = Uuid::new_v4();

        let mut handles = Vec::new();
        for i in 0..16 {
            let locks = Arc::clone(&locks);
            handles.push(tokio::spawn(async move {
                locks
                    .acquire(trace_id, &format!("engine-{}", i), Duration::from_secs(5))
                    .await
                    .unwrap()
            }));
        }

        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1, "exactly one concurrent acquirer wins");
    }
}
