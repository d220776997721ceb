use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqlitePool, Type};
use strum_macros::{Display, EnumString};

const JOB_COLUMNS: &str = "id, event_id, endpoint_id, parent_delivery_id, status, attempts, \
     next_run_at, last_error, created_at, updated_at";

#[derive(
    Debug, Clone, Copy, Type, Serialize, Deserialize, PartialEq, Eq, EnumString, Display, Default,
)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum JobStatus {
    #[default]
    Waiting,
    Active,
    Delayed,
    Completed,
    Failed,
}

/// One durable scheduling unit. The row id doubles as the idempotency key
/// (`delivery-{event_id}` for automatic enqueues, `retry-{delivery_id}-{ms}`
/// for manual replays), so a duplicate submit is a no-op.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct DeliveryJob {
    pub id: String,
    pub event_id: String,
    pub endpoint_id: String,
    /// Latest attempt in the chain; the next delivery links to it.
    pub parent_delivery_id: Option<String>,
    pub status: JobStatus,
    pub attempts: i64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Current job counts by status.
#[derive(Debug, Default, Clone, Serialize)]
pub struct QueueCounts {
    pub waiting: i64,
    pub active: i64,
    pub completed: i64,
    pub failed: i64,
    pub delayed: i64,
}

impl DeliveryJob {
    /// Submit a job under an idempotency key. Returns false when a job with
    /// the same key already exists.
    pub async fn submit(
        pool: &SqlitePool,
        job_id: &str,
        event_id: &str,
        endpoint_id: &str,
        parent_delivery_id: Option<&str>,
    ) -> Result<bool, sqlx::Error> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO delivery_jobs \
             (id, event_id, endpoint_id, parent_delivery_id, status, attempts, created_at, updated_at)
             VALUES ($1, $2, $3, $4, 'waiting', 0, $5, $6)",
        )
        .bind(job_id)
        .bind(event_id)
        .bind(endpoint_id)
        .bind(parent_delivery_id)
        .bind(now)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_by_id(pool: &SqlitePool, id: &str) -> Result<Option<Self>, sqlx::Error> {
        sqlx::query_as::<_, DeliveryJob>(&format!(
            "SELECT {JOB_COLUMNS} FROM delivery_jobs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(pool)
        .await
    }

    /// Atomically claim the oldest ready job (waiting, or delayed and due)
    /// and mark it active. Safe under concurrent workers: the pick and the
    /// transition happen in one statement.
    pub async fn claim_ready(pool: &SqlitePool) -> Result<Option<Self>, sqlx::Error> {
        let now = Utc::now();
        sqlx::query_as::<_, DeliveryJob>(&format!(
            "UPDATE delivery_jobs SET status = 'active', updated_at = $1
             WHERE id = (
                 SELECT id FROM delivery_jobs
                 WHERE status = 'waiting' OR (status = 'delayed' AND next_run_at <= $1)
                 ORDER BY created_at ASC
                 LIMIT 1
             )
             RETURNING {JOB_COLUMNS}"
        ))
        .bind(now)
        .fetch_optional(pool)
        .await
    }

    pub async fn complete(pool: &SqlitePool, id: &str) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE delivery_jobs SET status = 'completed', updated_at = $2 WHERE id = $1")
            .bind(id)
            .bind(Utc::now())
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn fail(pool: &SqlitePool, id: &str, error: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE delivery_jobs SET status = 'failed', last_error = $2, updated_at = $3 \
             WHERE id = $1",
        )
        .bind(id)
        .bind(error)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Schedule the next attempt: bump the attempt counter, link the chain to
    /// the just-written delivery (kept unchanged when `parent_delivery_id` is
    /// None), and delay until `next_run_at`.
    pub async fn retry(
        pool: &SqlitePool,
        id: &str,
        parent_delivery_id: Option<&str>,
        error: &str,
        next_run_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE delivery_jobs
             SET status = 'delayed', attempts = attempts + 1,
                 parent_delivery_id = COALESCE($2, parent_delivery_id),
                 last_error = $3, next_run_at = $4, updated_at = $5
             WHERE id = $1",
        )
        .bind(id)
        .bind(parent_delivery_id)
        .bind(error)
        .bind(next_run_at)
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Return jobs left `active` by a crashed process to the queue.
    pub async fn requeue_stale(pool: &SqlitePool) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE delivery_jobs SET status = 'waiting', updated_at = $1 WHERE status = 'active'",
        )
        .bind(Utc::now())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn counts(pool: &SqlitePool) -> Result<QueueCounts, sqlx::Error> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT status, COUNT(*) FROM delivery_jobs GROUP BY status")
                .fetch_all(pool)
                .await?;
        let mut counts = QueueCounts::default();
        for (status, count) in rows {
            match status.as_str() {
                "waiting" => counts.waiting = count,
                "active" => counts.active = count,
                "completed" => counts.completed = count,
                "failed" => counts.failed = count,
                "delayed" => counts.delayed = count,
                _ => {}
            }
        }
        Ok(counts)
    }

    /// Drop completed jobs past their retention window or count cap, and
    /// failed jobs past theirs. Returns the number of rows removed.
    pub async fn cleanup(
        pool: &SqlitePool,
        completed_cutoff: DateTime<Utc>,
        completed_keep: i64,
        failed_cutoff: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let mut removed = sqlx::query(
            "DELETE FROM delivery_jobs WHERE status = 'completed' AND updated_at < $1",
        )
        .bind(completed_cutoff)
        .execute(pool)
        .await?
        .rows_affected();
        removed += sqlx::query(
            "DELETE FROM delivery_jobs
             WHERE status = 'completed' AND id NOT IN (
                 SELECT id FROM delivery_jobs WHERE status = 'completed'
                 ORDER BY updated_at DESC LIMIT $1
             )",
        )
        .bind(completed_keep)
        .execute(pool)
        .await?
        .rows_affected();
        removed +=
            sqlx::query("DELETE FROM delivery_jobs WHERE status = 'failed' AND updated_at < $1")
                .bind(failed_cutoff)
                .execute(pool)
                .await?
                .rows_affected();
        Ok(removed)
    }
}
