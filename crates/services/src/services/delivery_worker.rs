//! Delivery worker pool: claims scheduled jobs, forwards the captured event,
//! and records every attempt in the delivery ledger.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use db::models::{
    delivery::{CreateDelivery, Delivery, DeliveryStatus},
    delivery_job::DeliveryJob,
    endpoint::Endpoint,
    event::Event,
};
use sqlx::SqlitePool;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::services::{forwarder::ForwardService, scheduler::DeliveryScheduler};

/// Default sleep between claim attempts when the queue is empty.
const DEFAULT_POLL_INTERVAL_MS: u64 = 500;

/// Environment variable overriding the poll interval.
const POLL_INTERVAL_ENV_VAR: &str = "HOOKFREIGHT_WORKER_POLL_INTERVAL_MS";

/// Error recorded when an endpoint cannot be forwarded to at all.
const NOT_FORWARDABLE_ERROR: &str = "forwarding not enabled or URL not configured";

pub struct DeliveryWorkerService {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

struct WorkerContext {
    pool: SqlitePool,
    scheduler: DeliveryScheduler,
    forwarder: ForwardService,
    poll_interval: Duration,
}

impl DeliveryWorkerService {
    /// Start `concurrency` workers draining the scheduler.
    pub fn spawn(
        pool: SqlitePool,
        scheduler: DeliveryScheduler,
        forwarder: ForwardService,
        concurrency: u32,
    ) -> Self {
        let cancel = CancellationToken::new();
        let ctx = Arc::new(WorkerContext {
            pool,
            scheduler,
            forwarder,
            poll_interval: Self::poll_interval(),
        });
        let handles = (0..concurrency)
            .map(|worker_id| {
                let ctx = ctx.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { worker_loop(worker_id, ctx, cancel).await })
            })
            .collect();
        info!(concurrency, "started delivery worker pool");
        Self { cancel, handles }
    }

    fn poll_interval() -> Duration {
        std::env::var(POLL_INTERVAL_ENV_VAR)
            .ok()
            .and_then(|s| s.parse::<u64>().ok())
            .map(Duration::from_millis)
            .unwrap_or(Duration::from_millis(DEFAULT_POLL_INTERVAL_MS))
    }

    /// Stop claiming new jobs, let active jobs finish, and join the pool.
    /// Unclaimed jobs stay queued for the next process.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "delivery worker task panicked");
            }
        }
        info!("delivery worker pool stopped");
    }
}

async fn worker_loop(worker_id: u32, ctx: Arc<WorkerContext>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            break;
        }
        match DeliveryJob::claim_ready(&ctx.pool).await {
            Ok(Some(job)) => {
                if let Err(e) = process_job(&ctx, &job).await {
                    // Job bookkeeping itself failed; the claim stays active
                    // and is requeued on the next startup.
                    error!(job_id = %job.id, error = %e, "job processing failed");
                }
            }
            Ok(None) => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ctx.poll_interval) => {}
                }
            }
            Err(e) => {
                error!(worker_id, error = %e, "failed to claim delivery job");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(ctx.poll_interval) => {}
                }
            }
        }
    }
    debug!(worker_id, "delivery worker exited");
}

/// Run one claimed job end to end.
async fn process_job(ctx: &WorkerContext, job: &DeliveryJob) -> Result<(), sqlx::Error> {
    let (event, endpoint) = tokio::join!(
        Event::find_by_id(&ctx.pool, &job.event_id),
        Endpoint::find_by_id(&ctx.pool, &job.endpoint_id),
    );
    let (event, endpoint) = (event?, endpoint?);

    // A missing referent is terminal: there is nothing left to forward.
    let Some(event) = event else {
        let destination = endpoint.map(|e| e.forward_url).unwrap_or_default();
        return record_terminal_failure(ctx, job, &destination, "event no longer exists").await;
    };
    let Some(endpoint) = endpoint else {
        return record_terminal_failure(ctx, job, "", "endpoint no longer exists").await;
    };

    if !endpoint.forwarding_enabled || endpoint.forward_url.is_empty() {
        return record_terminal_failure(ctx, job, &endpoint.forward_url, NOT_FORWARDABLE_ERROR)
            .await;
    }

    let outcome = ctx.forwarder.forward(&event, &endpoint).await;
    let error_message = outcome.error_message.clone();
    let retryable = outcome.retryable;
    let delivered = outcome.status == DeliveryStatus::Delivered;

    let delivery = Delivery::create(
        &ctx.pool,
        &CreateDelivery {
            event_id: job.event_id.clone(),
            parent_delivery_id: job.parent_delivery_id.clone(),
            status: outcome.status,
            destination_url: endpoint.forward_url.clone(),
            response_status: outcome.response_status.map(i64::from),
            response_headers: outcome.response_headers,
            response_body: outcome.response_body,
            duration_ms: outcome.duration_ms as i64,
            error_message: error_message.clone(),
        },
    )
    .await;

    match delivery {
        Ok(delivery) => {
            if delivered {
                info!(
                    event_id = %job.event_id,
                    delivery_id = %delivery.id,
                    duration_ms = delivery.duration_ms,
                    "event delivered"
                );
                return DeliveryJob::complete(&ctx.pool, &job.id).await;
            }
            let error = error_message.unwrap_or_else(|| "delivery failed".to_string());
            if retryable {
                schedule_retry(ctx, job, Some(&delivery.id), &error).await
            } else {
                warn!(
                    event_id = %job.event_id,
                    delivery_id = %delivery.id,
                    error = %error,
                    "delivery failed, chain terminated"
                );
                DeliveryJob::complete(&ctx.pool, &job.id).await
            }
        }
        Err(e) if is_unique_violation(&e) => {
            // This attempt was already recorded (the job came back after an
            // ungraceful exit). The ledger is ahead of the queue; just settle
            // the job.
            warn!(job_id = %job.id, "delivery already recorded for this attempt");
            DeliveryJob::complete(&ctx.pool, &job.id).await
        }
        Err(e) => {
            // The forward already happened but the ledger write failed; retry
            // so the ledger catches up. This yields at-least-once forwarding.
            schedule_retry(ctx, job, None, &format!("failed to record delivery: {e}")).await
        }
    }
}

/// Consume one attempt: delay the job with backoff when attempts remain,
/// otherwise mark the chain exhausted.
async fn schedule_retry(
    ctx: &WorkerContext,
    job: &DeliveryJob,
    parent_delivery_id: Option<&str>,
    error: &str,
) -> Result<(), sqlx::Error> {
    let attempt = job.attempts + 1;
    if (attempt as u32) < ctx.scheduler.max_retries() {
        let delay = DeliveryScheduler::backoff_delay(attempt as u32);
        let next_run_at = Utc::now()
            + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(1));
        DeliveryJob::retry(&ctx.pool, &job.id, parent_delivery_id, error, next_run_at).await?;
        warn!(
            job_id = %job.id,
            attempt,
            next_run_at = %next_run_at,
            error = %error,
            "delivery failed, retry scheduled"
        );
    } else {
        DeliveryJob::fail(&ctx.pool, &job.id, error).await?;
        error!(
            job_id = %job.id,
            attempts = attempt,
            error = %error,
            "delivery failed, retries exhausted"
        );
    }
    Ok(())
}

/// Record a failed delivery for a job that can never succeed, then complete
/// the job.
async fn record_terminal_failure(
    ctx: &WorkerContext,
    job: &DeliveryJob,
    destination_url: &str,
    message: &str,
) -> Result<(), sqlx::Error> {
    let result = Delivery::create(
        &ctx.pool,
        &CreateDelivery {
            event_id: job.event_id.clone(),
            parent_delivery_id: job.parent_delivery_id.clone(),
            status: DeliveryStatus::Failed,
            destination_url: destination_url.to_string(),
            response_status: None,
            response_headers: None,
            response_body: None,
            duration_ms: 0,
            error_message: Some(message.to_string()),
        },
    )
    .await;
    match result {
        Ok(delivery) => {
            warn!(
                job_id = %job.id,
                delivery_id = %delivery.id,
                error = %message,
                "delivery refused"
            );
        }
        Err(e) if is_unique_violation(&e) => {
            warn!(job_id = %job.id, "refusal already recorded for this attempt");
        }
        Err(e) => return Err(e),
    }
    DeliveryJob::complete(&ctx.pool, &job.id).await
}

fn is_unique_violation(error: &sqlx::Error) -> bool {
    error
        .as_database_error()
        .map(|e| e.is_unique_violation())
        .unwrap_or(false)
}
