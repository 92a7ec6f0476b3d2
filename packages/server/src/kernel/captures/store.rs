//! Capture repository: PostgreSQL-backed storage for capture jobs.
//!
//! The claim protocol lives here. `try_claim` issues a single conditional
//! UPDATE keyed on both the capture id and the expected prior status; the
//! database's row-level atomicity makes it safe for any number of workers
//! to race on the same pending capture — exactly one sees a row count of 1.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::capture::{Capture, CaptureOutcome, CaptureStatus};

/// Storage interface for capture jobs.
///
/// Kept as a trait so the worker can run against an in-memory fake in tests.
#[async_trait]
pub trait CaptureStore: Send + Sync {
    /// Insert a freshly created pending capture.
    async fn insert(&self, capture: &Capture) -> Result<()>;

    /// Fetch a capture by id.
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Capture>>;

    /// The single oldest pending capture, by creation time.
    async fn find_oldest_pending(&self) -> Result<Option<Capture>>;

    /// Number of captures currently waiting in the queue.
    async fn count_pending(&self) -> Result<i64>;

    /// Attempt the pending -> started transition. Returns the number of rows
    /// affected: 1 means the caller now exclusively owns the capture, 0 means
    /// another worker won the race.
    async fn try_claim(&self, id: Uuid) -> Result<u64>;

    /// Stamp the started timestamp on a capture this worker owns.
    async fn mark_started(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    /// Write the terminal state of a capture run.
    async fn finish(&self, id: Uuid, outcome: &CaptureOutcome) -> Result<()>;
}

/// PostgreSQL-backed capture store.
pub struct PostgresCaptureStore {
    pool: PgPool,
}

impl PostgresCaptureStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CaptureStore for PostgresCaptureStore {
    async fn insert(&self, capture: &Capture) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO captures (id, access_key_id, url, callback_url, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(capture.id)
        .bind(capture.access_key_id)
        .bind(&capture.url)
        .bind(&capture.callback_url)
        .bind(capture.status)
        .bind(capture.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<Capture>> {
        let capture = sqlx::query_as::<_, Capture>(
            r#"
            SELECT id, access_key_id, url, callback_url, status, created_at,
                   started_at, ended_at, stdout_logs, stderr_logs, summary
            FROM captures
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(capture)
    }

    async fn find_oldest_pending(&self) -> Result<Option<Capture>> {
        let capture = sqlx::query_as::<_, Capture>(
            r#"
            SELECT id, access_key_id, url, callback_url, status, created_at,
                   started_at, ended_at, stdout_logs, stderr_logs, summary
            FROM captures
            WHERE status = 'pending'
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        Ok(capture)
    }

    async fn count_pending(&self) -> Result<i64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM captures WHERE status = 'pending'")
                .fetch_one(&self.pool)
                .await?;

        Ok(count)
    }

    async fn try_claim(&self, id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE captures
            SET status = 'started'
            WHERE id = $1 AND status = 'pending'
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn mark_started(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE captures
            SET started_at = $1
            WHERE id = $2 AND status = 'started'
            "#,
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn finish(&self, id: Uuid, outcome: &CaptureOutcome) -> Result<()> {
        debug_assert!(outcome.status.is_terminal());

        sqlx::query(
            r#"
            UPDATE captures
            SET status = $1,
                ended_at = $2,
                stdout_logs = COALESCE($3, stdout_logs),
                stderr_logs = COALESCE($4, stderr_logs),
                summary = COALESCE($5, summary)
            WHERE id = $6
            "#,
        )
        .bind(outcome.status)
        .bind(outcome.ended_at)
        .bind(&outcome.stdout_logs)
        .bind(&outcome.stderr_logs)
        .bind(&outcome.summary)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

/// Queue counts used by the `status` CLI command.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueueCounts {
    pub pending: i64,
    pub started: i64,
}

impl PostgresCaptureStore {
    /// Pending/started counts in one round trip.
    pub async fn queue_counts(&self) -> Result<QueueCounts> {
        let rows: Vec<(CaptureStatus, i64)> = sqlx::query_as(
            r#"
            SELECT status, COUNT(*)
            FROM captures
            WHERE status IN ('pending', 'started')
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status {
                CaptureStatus::Pending => counts.pending = count,
                CaptureStatus::Started => counts.started = count,
                _ => {}
            }
        }

        Ok(counts)
    }
}
