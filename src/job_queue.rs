//! Durable, retrying job queue plus the daily scan schedule (C8, spec §4.8).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::{PgPool, Row};
use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::time::{sleep, Duration};
use tokio_cron_scheduler::{Job as CronJob, JobScheduler};

use crate::action_executor::ActionExecutor;
use crate::platform::PlatformClient;
use crate::scan_orchestrator::ScanOrchestrator;
use crate::webhooks::handle_pull_request_job;
use crate::config_loader::ConfigLoader;

const MAX_ATTEMPTS: i32 = 10;
const BASE_BACKOFF_SECS: i64 = 2;
const MAX_BACKOFF_SECS: i64 = 600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Job {
    ProcessActionsForScan {
        scan_id: i64,
    },
    HandlePullRequest {
        repo_full_name: String,
        pr_number: i64,
        head_sha: String,
    },
    RunDailyScan,
}

pub async fn enqueue_job(pool: &PgPool, job: &Job) {
    if let Ok(payload) = serde_json::to_value(job) {
        let _ = sqlx::query("INSERT INTO job_queue (payload) VALUES ($1)")
            .bind(payload)
            .execute(pool)
            .await;
    } else {
        tracing::error!("failed to serialize job for persistence");
    }
}

fn backoff_for(attempts: i32) -> Duration {
    let secs = BASE_BACKOFF_SECS.saturating_mul(1i64 << attempts.min(8)).min(MAX_BACKOFF_SECS);
    Duration::from_secs(secs as u64)
}

/// Shared handles the worker loop needs to execute any `Job` variant.
#[derive(Clone)]
pub struct Services {
    pub pool: PgPool,
    pub client: Arc<dyn PlatformClient>,
    pub config_loader: Arc<ConfigLoader>,
    pub scan_orchestrator: Arc<ScanOrchestrator>,
    pub action_executor: Arc<ActionExecutor>,
}

async fn run_job(services: &Services, job: &Job) -> Result<(), String> {
    match job {
        Job::ProcessActionsForScan { scan_id } => services
            .action_executor
            .process_actions_for_scan(*scan_id)
            .await
            .map_err(|e| e.to_string()),
        Job::HandlePullRequest {
            repo_full_name,
            pr_number,
            head_sha,
        } => handle_pull_request_job(
            &services.pool,
            services.client.as_ref(),
            services.config_loader.as_ref(),
            services.action_executor.as_ref(),
            repo_full_name,
            *pr_number,
            head_sha,
        )
        .await
        .map_err(|v| v.to_string()),
        Job::RunDailyScan => services
            .scan_orchestrator
            .perform_scan()
            .await
            .map(|_| ())
            .map_err(|e| e.to_string()),
    }
}

/// Starts the queue's worker: a Postgres replay loop that polls `job_queue`
/// for due, queued rows and hands each to an in-process dispatcher. All
/// durability and retry bookkeeping lives in the `job_queue` table itself —
/// `enqueue_job` is the only way new work enters the queue.
pub fn start_worker(services: Services) -> JoinHandle {
    let (tx, mut rx): (Sender<(i64, Job)>, Receiver<(i64, Job)>) = channel(64);

    let replay_pool = services.pool.clone();
    tokio::spawn(async move {
        loop {
            let rows = sqlx::query(
                "SELECT id, payload FROM job_queue \
                 WHERE status = 'queued' AND run_at <= NOW() ORDER BY id LIMIT 50",
            )
            .fetch_all(&replay_pool)
            .await
            .unwrap_or_default();

            for row in rows {
                let id: i64 = row.get("id");
                let payload: Value = row.get("payload");
                match serde_json::from_value::<Job>(payload) {
                    Ok(job) => {
                        let _ = sqlx::query("UPDATE job_queue SET status = 'processing' WHERE id = $1")
                            .bind(id)
                            .execute(&replay_pool)
                            .await;
                        if tx.send((id, job)).await.is_err() {
                            tracing::warn!("job worker channel closed, leaving job queued");
                        }
                    }
                    Err(err) => {
                        tracing::error!(job_id = id, error = ?err, "dropping unparsable job");
                        let _ = sqlx::query("UPDATE job_queue SET status = 'dead' WHERE id = $1")
                            .bind(id)
                            .execute(&replay_pool)
                            .await;
                    }
                }
            }
            sleep(Duration::from_secs(1)).await;
        }
    });

    tokio::spawn(async move {
        while let Some((id, job)) = rx.recv().await {
            let services = services.clone();
            tokio::spawn(async move {
                dispatch_with_retry(&services, id, job).await;
            });
        }
    })
}

/// Handle to the dispatcher task; dropping it does not stop the worker, it
/// only lets the caller observe whether the task is still alive.
pub type JoinHandle = tokio::task::JoinHandle<()>;

async fn dispatch_with_retry(services: &Services, id: i64, job: Job) {
    match run_job(services, &job).await {
        Ok(()) => {
            tracing::info!(job_id = id, job = ?job, "job completed");
            let _ = sqlx::query("DELETE FROM job_queue WHERE id = $1")
                .bind(id)
                .execute(&services.pool)
                .await;
        }
        Err(err) => {
            tracing::warn!(job_id = id, job = ?job, error = %err, "job failed");
            let attempts: i32 = sqlx::query("SELECT attempts FROM job_queue WHERE id = $1")
                .bind(id)
                .fetch_optional(&services.pool)
                .await
                .ok()
                .flatten()
                .map(|row| row.get("attempts"))
                .unwrap_or(0);
            let next_attempts = attempts + 1;

            if next_attempts >= MAX_ATTEMPTS {
                tracing::error!(job_id = id, "job exceeded max attempts, moving to dead letter");
                let _ = sqlx::query(
                    "UPDATE job_queue SET status = 'dead', attempts = $2, last_error = $3 WHERE id = $1",
                )
                .bind(id)
                .bind(next_attempts)
                .bind(&err)
                .execute(&services.pool)
                .await;
            } else {
                let delay = backoff_for(next_attempts);
                let _ = sqlx::query(
                    "UPDATE job_queue SET status = 'queued', attempts = $2, last_error = $3, \
                     run_at = NOW() + ($4 || ' seconds')::interval WHERE id = $1",
                )
                .bind(id)
                .bind(next_attempts)
                .bind(&err)
                .bind(delay.as_secs().to_string())
                .execute(&services.pool)
                .await;
            }
        }
    }
}

/// Registers the `0 0 * * *` recurring organization scan.
pub async fn start_daily_scan_schedule(pool: PgPool) -> Result<JobScheduler, anyhow::Error> {
    let scheduler = JobScheduler::new().await?;
    let job = CronJob::new_async("0 0 0 * * *", move |_uuid, _l| {
        let pool = pool.clone();
        Box::pin(async move {
            tracing::info!("daily scan schedule fired");
            enqueue_job(&pool, &Job::RunDailyScan).await;
        })
    })?;
    scheduler.add(job).await?;
    scheduler.start().await?;
    Ok(scheduler)
}
