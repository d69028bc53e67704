use super::{Page, PageRequest, Result, StorageError};
use crate::core::{Context, ContextStatus, RetryRecord, Trace, TraceStatus};
use crate::definition::NodeId;
use crate::lock::{LockError, LockInfo, TraceLocks};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::debug;
use uuid::Uuid;

/// Default pool size for the SQLite connection pool.
const DEFAULT_POOL_SIZE: u32 = 10;

/// Default connection timeout in seconds.
const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Configuration for the SQLite connection pool.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of connections in the pool.
    pub max_size: u32,
    /// Minimum number of idle connections to maintain.
    pub min_idle: Option<u32>,
    /// Maximum time to wait for a connection from the pool.
    pub connection_timeout: Duration,
    /// Maximum lifetime of a connection.
    pub max_lifetime: Option<Duration>,
    /// Idle timeout for connections.
    pub idle_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_POOL_SIZE,
            min_idle: Some(2),
            connection_timeout: Duration::from_secs(DEFAULT_CONNECTION_TIMEOUT_SECS),
            max_lifetime: None,
            idle_timeout: Some(Duration::from_secs(600)),
        }
    }
}

/// SQLite-backed context store with connection pooling.
///
/// Every composite operation runs inside one explicit transaction, and
/// every conditional operation is a single `UPDATE ... WHERE status = ?`
/// statement, so the affected-row count is the compare-and-swap outcome.
///
/// This backend also implements [`TraceLocks`]: the lease table lives in
/// the same database, which gives a small fleet sharing one file (or one
/// server in front of it) real cross-process mutual exclusion.
pub struct SqliteStore {
    pool: SqlitePool,
    db_path: String,
}

impl SqliteStore {
    /// Opens (creating if missing) a store at the given database path with
    /// default pool configuration.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        Self::with_config(db_path, PoolConfig::default()).await
    }

    /// Opens a store with custom pool configuration.
    pub async fn with_config(db_path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        let connect_options = SqliteConnectOptions::from_str(&format!("sqlite://{}", db_path_str))
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .create_if_missing(true);

        let pool = Self::build_pool(connect_options, &config).await?;
        let store = Self {
            pool,
            db_path: db_path_str,
        };
        store.initialize().await?;
        Ok(store)
    }

    /// Creates an in-memory store.
    ///
    /// In-memory databases use a single connection so every caller sees
    /// the same data; suitable for tests.
    pub async fn in_memory() -> Result<Self> {
        let connect_options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StorageError::Connection(e.to_string()))?
            .journal_mode(SqliteJournalMode::Memory)
            .synchronous(SqliteSynchronous::Normal);

        let config = PoolConfig {
            max_size: 1,
            min_idle: Some(0),
            ..PoolConfig::default()
        };

        let pool = Self::build_pool(connect_options, &config).await?;
        let store = Self {
            pool,
            db_path: ":memory:".to_string(),
        };
        store.initialize().await?;
        Ok(store)
    }

    async fn build_pool(
        connect_options: SqliteConnectOptions,
        config: &PoolConfig,
    ) -> Result<Pool<Sqlite>> {
        let mut builder = SqlitePoolOptions::new()
            .max_connections(config.max_size)
            .acquire_timeout(config.connection_timeout);

        if let Some(min_idle) = config.min_idle {
            builder = builder.min_connections(min_idle);
        }
        if let Some(max_lifetime) = config.max_lifetime {
            builder = builder.max_lifetime(max_lifetime);
        }
        if let Some(idle_timeout) = config.idle_timeout {
            builder = builder.idle_timeout(idle_timeout);
        }

        builder
            .connect_with(connect_options)
            .await
            .map_err(|e| StorageError::Connection(e.to_string()))
    }

    /// Initialize the database schema.
    async fn initialize(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS flow_context (
                id TEXT PRIMARY KEY,
                trace_id TEXT NOT NULL,
                stream_id TEXT NOT NULL,
                position TEXT NOT NULL,
                status TEXT CHECK( status IN ('NEW','PENDING','READY','RETRYABLE','ARCHIVED','ERROR') ) NOT NULL,
                data BLOB NOT NULL,
                retry_count INTEGER NOT NULL DEFAULT 0,
                to_batch INTEGER NOT NULL DEFAULT 0,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        // One active context per (trace, position); terminals drop out of
        // the index so a position can be revisited.
        sqlx::query(
            "CREATE UNIQUE INDEX IF NOT EXISTS idx_flow_context_active_position
             ON flow_context(trace_id, position)
             WHERE status NOT IN ('ARCHIVED','ERROR')",
        )
        .execute(&self.pool)
        .await?;

        // Index backing the recovery scan's keyset pagination.
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_flow_context_stream_status
             ON flow_context(stream_id, status, id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_flow_context_trace ON flow_context(trace_id)",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS flow_trace (
                trace_id TEXT PRIMARY KEY,
                stream_id TEXT NOT NULL,
                status TEXT CHECK( status IN ('RUNNING','COMPLETE','FAILED') ) NOT NULL,
                operator TEXT,
                tenant TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS flow_retry (
                context_id TEXT PRIMARY KEY,
                attempts INTEGER NOT NULL,
                next_eligible INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS trace_lock (
                trace_id TEXT PRIMARY KEY,
                owner_id TEXT NOT NULL,
                lease_expiry INTEGER NOT NULL,
                acquired_at INTEGER NOT NULL
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Returns the database path.
    pub fn db_path(&self) -> &str {
        &self.db_path
    }

    fn row_to_context(row: &sqlx::sqlite::SqliteRow) -> Result<Context> {
        let id = parse_uuid(row.try_get("id")?)?;
        let trace_id = parse_uuid(row.try_get("trace_id")?)?;
        let stream_id: String = row.try_get("stream_id")?;
        let position: String = row.try_get("position")?;
        let status_str: String = row.try_get("status")?;
        let status = ContextStatus::from_str(&status_str)?;
        let data: Vec<u8> = row.try_get("data")?;
        let retry_count: i64 = row.try_get("retry_count")?;
        let to_batch: i64 = row.try_get("to_batch")?;
        let created_at = parse_millis(row.try_get("created_at")?);
        let updated_at = parse_millis(row.try_get("updated_at")?);

        Ok(Context::from_parts(
            id,
            trace_id,
            stream_id,
            NodeId::new(position),
            status,
            data,
            retry_count as u32,
            to_batch,
            created_at,
            updated_at,
        ))
    }

    fn row_to_trace(row: &sqlx::sqlite::SqliteRow) -> Result<Trace> {
        let trace_id = parse_uuid(row.try_get("trace_id")?)?;
        let stream_id: String = row.try_get("stream_id")?;
        let status_str: String = row.try_get("status")?;
        let status = TraceStatus::from_str(&status_str)?;
        let operator: Option<String> = row.try_get("operator")?;
        let tenant: Option<String> = row.try_get("tenant")?;
        let created_at = parse_millis(row.try_get("created_at")?);
        let updated_at = parse_millis(row.try_get("updated_at")?);

        Ok(Trace::from_parts(
            trace_id, stream_id, status, operator, tenant, created_at, updated_at,
        ))
    }

    /// Recomputes the trace status from its contexts inside the caller's
    /// transaction.
    async fn recompute_trace_status(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        trace_id: Uuid,
    ) -> Result<()> {
        let rows = sqlx::query("SELECT status FROM flow_context WHERE trace_id = ?")
            .bind(trace_id.to_string())
            .fetch_all(&mut **tx)
            .await?;

        let mut statuses = Vec::with_capacity(rows.len());
        for row in &rows {
            let status_str: String = row.try_get("status")?;
            statuses.push(ContextStatus::from_str(&status_str)?);
        }
        let derived = TraceStatus::derive(statuses);

        sqlx::query("UPDATE flow_trace SET status = ?, updated_at = ? WHERE trace_id = ?")
            .bind(derived.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(trace_id.to_string())
            .execute(&mut **tx)
            .await?;

        Ok(())
    }

    async fn insert_context(
        tx: &mut sqlx::Transaction<'_, Sqlite>,
        context: &Context,
    ) -> Result<()> {
        let result = sqlx::query(
            "INSERT INTO flow_context
                 (id, trace_id, stream_id, position, status, data, retry_count, to_batch, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(context.id().to_string())
        .bind(context.trace_id().to_string())
        .bind(context.stream_id())
        .bind(context.position().as_str())
        .bind(context.status().as_str())
        .bind(context.data())
        .bind(context.retry_count() as i64)
        .bind(context.to_batch())
        .bind(context.created_at().timestamp_millis())
        .bind(context.updated_at().timestamp_millis())
        .execute(&mut **tx)
        .await;

        match result {
            Ok(_) => Ok(()),
            // The partial unique index reports a duplicate active position.
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                Err(StorageError::DuplicateContext {
                    trace_id: context.trace_id(),
                    position: context.position().clone(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn status_placeholders(statuses: &[ContextStatus]) -> String {
        statuses.iter().map(|_| "?").collect::<Vec<_>>().join(", ")
    }
}

fn parse_uuid(s: String) -> Result<Uuid> {
    Uuid::parse_str(&s).map_err(|e| StorageError::Connection(e.to_string()))
}

fn parse_millis(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}

#[async_trait]
impl super::ContextStore for SqliteStore {
    async fn save_trace(&self, trace: &Trace) -> Result<()> {
        sqlx::query(
            "INSERT INTO flow_trace (trace_id, stream_id, status, operator, tenant, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(trace_id) DO UPDATE SET
                 status = excluded.status,
                 updated_at = excluded.updated_at",
        )
        .bind(trace.trace_id().to_string())
        .bind(trace.stream_id())
        .bind(trace.status().as_str())
        .bind(trace.operator())
        .bind(trace.tenant())
        .bind(trace.created_at().timestamp_millis())
        .bind(trace.updated_at().timestamp_millis())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_trace(&self, trace_id: Uuid) -> Result<Option<Trace>> {
        sqlx::query("SELECT * FROM flow_trace WHERE trace_id = ?")
            .bind(trace_id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Self::row_to_trace(&row))
            .transpose()
    }

    async fn save_contexts(&self, contexts: &[Context]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        for context in contexts {
            Self::insert_context(&mut tx, context).await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn get_context(&self, id: Uuid) -> Result<Option<Context>> {
        sqlx::query("SELECT * FROM flow_context WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?
            .map(|row| Self::row_to_context(&row))
            .transpose()
    }

    async fn contexts_for_trace(&self, trace_id: Uuid) -> Result<Vec<Context>> {
        let rows = sqlx::query(
            "SELECT * FROM flow_context WHERE trace_id = ? ORDER BY created_at ASC, id ASC",
        )
        .bind(trace_id.to_string())
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_context).collect()
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
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = ids.iter().map(|_| "?").collect::<Vec<_>>().join(", ");
        let sql = format!(
            "UPDATE flow_context SET status = ?, updated_at = ?
             WHERE status = ? AND id IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(Utc::now().timestamp_millis())
            .bind(from.as_str());
        for id in ids {
            query = query.bind(id.to_string());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }

    async fn contexts_by_status(
        &self,
        stream_id: &str,
        statuses: &[ContextStatus],
        page: PageRequest,
    ) -> Result<Page<Context>> {
        if statuses.is_empty() {
            return Ok(Page {
                items: Vec::new(),
                next: None,
            });
        }

        let sql = format!(
            "SELECT * FROM flow_context
             WHERE stream_id = ? AND status IN ({}) AND id > ?
             ORDER BY id ASC
             LIMIT ?",
            Self::status_placeholders(statuses)
        );

        // Keyset cursor: the empty string sorts before every UUID.
        let after = page.after.map(|id| id.to_string()).unwrap_or_default();

        let mut query = sqlx::query(&sql).bind(stream_id);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        query = query.bind(after).bind(page.limit as i64);

        let rows = query.fetch_all(&self.pool).await?;
        let items: Vec<Context> = rows
            .iter()
            .map(Self::row_to_context)
            .collect::<Result<_>>()?;

        let next = if items.len() == page.limit {
            items.last().map(|ctx| ctx.id())
        } else {
            None
        };

        Ok(Page { items, next })
    }

    async fn active_streams(&self) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT DISTINCT stream_id FROM flow_context
             WHERE status IN ('NEW','PENDING','READY','RETRYABLE')
             ORDER BY stream_id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|row| row.try_get::<String, _>("stream_id").map_err(Into::into))
            .collect()
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

        let mut tx = self.pool.begin().await?;

        let moved = sqlx::query(
            "UPDATE flow_context
             SET position = ?, status = 'PENDING', to_batch = ?, data = ?, updated_at = ?
             WHERE id = ? AND status = 'READY'
             RETURNING *",
        )
        .bind(successors[0].as_str())
        .bind(batch)
        .bind(data)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(moved_row) = moved else {
            // Lost the swap; nothing to commit.
            return Ok(None);
        };
        let moved = Self::row_to_context(&moved_row)?;

        let mut results = vec![moved.clone()];
        for position in &successors[1..] {
            let sibling = Context::sibling(&moved, position.clone(), batch, data.to_vec());
            Self::insert_context(&mut tx, &sibling).await?;
            results.push(sibling);
        }

        tx.commit().await?;
        Ok(Some(results))
    }

    async fn archive_context(&self, id: Uuid, data: &[u8]) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE flow_context
             SET status = 'ARCHIVED', data = ?, updated_at = ?
             WHERE id = ? AND status = 'READY'
             RETURNING trace_id",
        )
        .bind(data)
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = result else {
            return Ok(false);
        };
        let trace_id = parse_uuid(row.try_get("trace_id")?)?;

        sqlx::query("DELETE FROM flow_retry WHERE context_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        Self::recompute_trace_status(&mut tx, trace_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn park_retryable(
        &self,
        id: Uuid,
        next_eligible: DateTime<Utc>,
    ) -> Result<Option<u32>> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE flow_context
             SET status = 'RETRYABLE', retry_count = retry_count + 1, updated_at = ?
             WHERE id = ? AND status = 'READY'
             RETURNING retry_count",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = result else {
            return Ok(None);
        };
        let attempts: i64 = row.try_get("retry_count")?;

        sqlx::query(
            "INSERT INTO flow_retry (context_id, attempts, next_eligible, updated_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(context_id) DO UPDATE SET
                 attempts = excluded.attempts,
                 next_eligible = excluded.next_eligible,
                 updated_at = excluded.updated_at",
        )
        .bind(id.to_string())
        .bind(attempts)
        .bind(next_eligible.timestamp_millis())
        .bind(Utc::now().timestamp_millis())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Some(attempts as u32))
    }

    async fn requeue_retryable(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE flow_context SET status = 'PENDING', updated_at = ?
             WHERE id = ? AND status = 'RETRYABLE'",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn fail_context(&self, id: Uuid) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE flow_context SET status = 'ERROR', updated_at = ?
             WHERE id = ? AND status = 'RETRYABLE'
             RETURNING trace_id",
        )
        .bind(Utc::now().timestamp_millis())
        .bind(id.to_string())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = result else {
            return Ok(false);
        };
        let trace_id = parse_uuid(row.try_get("trace_id")?)?;

        sqlx::query("DELETE FROM flow_retry WHERE context_id = ?")
            .bind(id.to_string())
            .execute(&mut *tx)
            .await?;

        Self::recompute_trace_status(&mut tx, trace_id).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn get_retry(&self, context_id: Uuid) -> Result<Option<RetryRecord>> {
        let row = sqlx::query("SELECT * FROM flow_retry WHERE context_id = ?")
            .bind(context_id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        let attempts: i64 = row.try_get("attempts")?;
        let next_eligible = parse_millis(row.try_get("next_eligible")?);
        Ok(Some(RetryRecord::new(
            context_id,
            attempts as u32,
            next_eligible,
        )))
    }

    async fn reset(&self) -> Result<()> {
        for table in ["flow_context", "flow_trace", "flow_retry", "trace_lock"] {
            sqlx::query(&format!("DELETE FROM {}", table))
                .execute(&self.pool)
                .await?;
        }
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

#[async_trait]
impl TraceLocks for SqliteStore {
    async fn acquire(&self, trace_id: Uuid, owner_id: &str, ttl: Duration) -> std::result::Result<bool, LockError> {
        let now = Utc::now();
        let expiry = now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        // Atomic create-if-absent-or-expired: the upsert only fires when
        // the standing lease has expired or we already hold it.
        let result = sqlx::query(
            "INSERT INTO trace_lock (trace_id, owner_id, lease_expiry, acquired_at)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(trace_id) DO UPDATE SET
                 owner_id = excluded.owner_id,
                 lease_expiry = excluded.lease_expiry,
                 acquired_at = excluded.acquired_at
             WHERE trace_lock.lease_expiry <= excluded.acquired_at
                OR trace_lock.owner_id = excluded.owner_id",
        )
        .bind(trace_id.to_string())
        .bind(owner_id)
        .bind(expiry.timestamp_millis())
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Backend(e.to_string()))?;

        let acquired = result.rows_affected() > 0;
        if acquired {
            debug!(trace_id = %trace_id, owner_id = %owner_id, "acquired trace lock");
        }
        Ok(acquired)
    }

    async fn renew(&self, trace_id: Uuid, owner_id: &str, ttl: Duration) -> std::result::Result<bool, LockError> {
        let now = Utc::now();
        let expiry = now + chrono::Duration::from_std(ttl).unwrap_or_else(|_| chrono::Duration::zero());

        // The fencing check: an expired or reclaimed lease cannot renew.
        let result = sqlx::query(
            "UPDATE trace_lock SET lease_expiry = ?
             WHERE trace_id = ? AND owner_id = ? AND lease_expiry > ?",
        )
        .bind(expiry.timestamp_millis())
        .bind(trace_id.to_string())
        .bind(owner_id)
        .bind(now.timestamp_millis())
        .execute(&self.pool)
        .await
        .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, trace_id: Uuid, owner_id: &str) -> std::result::Result<(), LockError> {
        sqlx::query("DELETE FROM trace_lock WHERE trace_id = ? AND owner_id = ?")
            .bind(trace_id.to_string())
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn holder(&self, trace_id: Uuid) -> std::result::Result<Option<LockInfo>, LockError> {
        let row = sqlx::query("SELECT owner_id, lease_expiry FROM trace_lock WHERE trace_id = ?")
            .bind(trace_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| LockError::Backend(e.to_string()))?;

        Ok(row.map(|row| LockInfo {
            trace_id,
            owner_id: row.get("owner_id"),
            lease_expiry: parse_millis(row.get("lease_expiry")),
        }))
    }
}
