//! Durable delivery scheduling on top of the `delivery_jobs` table.
//!
//! Jobs are submitted under idempotency keys, claimed by the worker pool,
//! and re-delayed with exponential backoff on retryable failures. Queued
//! jobs survive a process restart.

use std::time::Duration;

use chrono::Utc;
use db::models::{
    delivery::Delivery,
    delivery_job::{DeliveryJob, QueueCounts},
    event::Event,
};
use sqlx::SqlitePool;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Default cap on automatic attempts per retry chain.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Base backoff in milliseconds; attempt n waits `base * 2^(n-1)`.
const BACKOFF_BASE_MS: u64 = 1000;

/// Retention windows for finished jobs.
const COMPLETED_RETENTION_HOURS: i64 = 24;
const COMPLETED_RETENTION_MAX: i64 = 1000;
const FAILED_RETENTION_DAYS: i64 = 7;

/// How often the retention sweeper runs.
const SWEEP_INTERVAL_SECS: u64 = 3600;

#[derive(Debug, Error)]
pub enum ScheduleError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("delivery not found: {0}")]
    DeliveryNotFound(String),

    #[error("event not found: {0}")]
    EventNotFound(String),
}

#[derive(Clone)]
pub struct DeliveryScheduler {
    pool: SqlitePool,
    max_retries: u32,
}

impl DeliveryScheduler {
    pub fn new(pool: SqlitePool, max_retries: u32) -> Self {
        Self { pool, max_retries }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Delay before attempt `attempt` (1-based): 1000ms, 2000ms, 4000ms, ...
    pub fn backoff_delay(attempt: u32) -> Duration {
        Duration::from_millis(BACKOFF_BASE_MS << attempt.saturating_sub(1).min(20))
    }

    /// Enqueue the delivery job for a freshly captured event. The job id is
    /// `delivery-{event_id}`, so a duplicate ingest of the same event cannot
    /// start a second chain.
    pub async fn enqueue(&self, event_id: &str, endpoint_id: &str) -> Result<bool, ScheduleError> {
        let job_id = format!("delivery-{event_id}");
        let submitted =
            DeliveryJob::submit(&self.pool, &job_id, event_id, endpoint_id, None).await?;
        if submitted {
            info!(event_id, endpoint_id, "enqueued delivery job");
        } else {
            debug!(event_id, "delivery job already enqueued, ignoring duplicate");
        }
        Ok(submitted)
    }

    /// Submit a manual replay of an existing delivery. The new chain links
    /// to the replayed attempt through `parent_delivery_id`.
    pub async fn enqueue_retry(&self, delivery_id: &str) -> Result<String, ScheduleError> {
        let delivery = Delivery::find_by_id(&self.pool, delivery_id)
            .await?
            .ok_or_else(|| ScheduleError::DeliveryNotFound(delivery_id.to_string()))?;
        let event = Event::find_by_id(&self.pool, &delivery.event_id)
            .await?
            .ok_or_else(|| ScheduleError::EventNotFound(delivery.event_id.clone()))?;

        let job_id = format!("retry-{}-{}", delivery_id, Utc::now().timestamp_millis());
        DeliveryJob::submit(
            &self.pool,
            &job_id,
            &delivery.event_id,
            &event.endpoint_id,
            Some(delivery_id),
        )
        .await?;
        info!(delivery_id, event_id = %delivery.event_id, job_id, "enqueued manual retry");
        Ok(job_id)
    }

    pub async fn counts(&self) -> Result<QueueCounts, ScheduleError> {
        Ok(DeliveryJob::counts(&self.pool).await?)
    }

    /// Return jobs orphaned in `active` state by an ungraceful exit.
    pub async fn requeue_stale(&self) -> Result<u64, ScheduleError> {
        Ok(DeliveryJob::requeue_stale(&self.pool).await?)
    }

    /// One retention pass: completed jobs kept 24h (max 1000 rows), failed
    /// jobs kept 7 days.
    pub async fn sweep_retention(&self) -> Result<u64, ScheduleError> {
        let now = Utc::now();
        let removed = DeliveryJob::cleanup(
            &self.pool,
            now - chrono::Duration::hours(COMPLETED_RETENTION_HOURS),
            COMPLETED_RETENTION_MAX,
            now - chrono::Duration::days(FAILED_RETENTION_DAYS),
        )
        .await?;
        Ok(removed)
    }

    /// Spawn the periodic retention sweeper as a background task.
    pub fn spawn_retention_sweeper(&self) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                match scheduler.sweep_retention().await {
                    Ok(removed) if removed > 0 => {
                        info!(removed, "swept finished delivery jobs");
                    }
                    Ok(_) => debug!("retention sweep removed nothing"),
                    Err(e) => error!(error = %e, "retention sweep failed"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use db::{
        DBService,
        models::{
            delivery::{CreateDelivery, Delivery, DeliveryStatus},
            delivery_job::DeliveryJob,
            event::{CreateEvent, Event},
        },
    };

    use super::*;

    fn sample_event(endpoint_id: &str) -> CreateEvent {
        CreateEvent {
            endpoint_id: endpoint_id.to_string(),
            method: "POST".to_string(),
            original_url: "http://localhost:3030/x".to_string(),
            source_url: None,
            path: "/x".to_string(),
            query: serde_json::json!({}),
            headers: serde_json::json!({}),
            body: b"{}".to_vec(),
            source_ip: "127.0.0.1".to_string(),
            user_agent: None,
        }
    }

    #[test]
    fn test_backoff_delay_doubles_from_one_second() {
        assert_eq!(DeliveryScheduler::backoff_delay(1), Duration::from_millis(1000));
        assert_eq!(DeliveryScheduler::backoff_delay(2), Duration::from_millis(2000));
        assert_eq!(DeliveryScheduler::backoff_delay(3), Duration::from_millis(4000));
        assert_eq!(DeliveryScheduler::backoff_delay(5), Duration::from_millis(16000));
    }

    #[tokio::test]
    async fn test_enqueue_is_idempotent_per_event() {
        let db = DBService::new_in_memory().await.unwrap();
        let scheduler = DeliveryScheduler::new(db.pool.clone(), DEFAULT_MAX_RETRIES);

        assert!(scheduler.enqueue("evt_1", "end_1").await.unwrap());
        assert!(!scheduler.enqueue("evt_1", "end_1").await.unwrap());

        let counts = scheduler.counts().await.unwrap();
        assert_eq!(counts.waiting, 1);
    }

    #[tokio::test]
    async fn test_enqueue_retry_links_parent() {
        let db = DBService::new_in_memory().await.unwrap();
        let scheduler = DeliveryScheduler::new(db.pool.clone(), DEFAULT_MAX_RETRIES);

        let event = Event::create(&db.pool, &sample_event("end_1")).await.unwrap();
        let delivery = Delivery::create(
            &db.pool,
            &CreateDelivery {
                event_id: event.id.clone(),
                parent_delivery_id: None,
                status: DeliveryStatus::Failed,
                destination_url: "http://dest.example/hook".to_string(),
                response_status: Some(400),
                response_headers: None,
                response_body: None,
                duration_ms: 5,
                error_message: None,
            },
        )
        .await
        .unwrap();

        let job_id = scheduler.enqueue_retry(&delivery.id).await.unwrap();
        assert!(job_id.starts_with(&format!("retry-{}-", delivery.id)));

        let job = DeliveryJob::find_by_id(&db.pool, &job_id).await.unwrap().unwrap();
        assert_eq!(job.event_id, event.id);
        assert_eq!(job.endpoint_id, "end_1");
        assert_eq!(job.parent_delivery_id.as_deref(), Some(delivery.id.as_str()));
    }

    #[tokio::test]
    async fn test_enqueue_retry_unknown_delivery() {
        let db = DBService::new_in_memory().await.unwrap();
        let scheduler = DeliveryScheduler::new(db.pool.clone(), DEFAULT_MAX_RETRIES);
        let err = scheduler.enqueue_retry("dlv_missing").await.unwrap_err();
        assert!(matches!(err, ScheduleError::DeliveryNotFound(_)));
    }
}
