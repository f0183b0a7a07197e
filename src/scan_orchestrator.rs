//! Drives one organization-wide scan end to end (C5, spec §4.5).

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::config_loader::{ConfigError, ConfigLoader};
use crate::db::{policies, repositories, scans, violations};
use crate::job_queue::{enqueue_job, Job};
use crate::platform::{PlatformClient, PlatformError};
use crate::policy_registry;

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

pub struct ScanOrchestrator {
    pool: PgPool,
    client: Arc<dyn PlatformClient>,
    config_loader: Arc<ConfigLoader>,
}

impl ScanOrchestrator {
    pub fn new(
        pool: PgPool,
        client: Arc<dyn PlatformClient>,
        config_loader: Arc<ConfigLoader>,
    ) -> Self {
        Self {
            pool,
            client,
            config_loader,
        }
    }

    /// Runs one full scan: sync policies, sync repositories, evaluate each
    /// repository, persist violations, mark the scan terminal, and enqueue
    /// action processing. Any unexpected error aborts the scan and marks it
    /// `Failed`, preserving whatever repository/policy rows were already
    /// synced (they are idempotent across runs) but not enqueueing actions
    /// (spec §4.5 failure policy).
    pub async fn perform_scan(&self) -> Result<i64, ScanError> {
        let scan = scans::start(&self.pool).await?;
        tracing::info!(scan_id = scan.id, "scan started");

        match self.run(scan.id).await {
            Ok(()) => {
                scans::mark_completed(&self.pool, scan.id).await?;
                tracing::info!(scan_id = scan.id, "scan completed");
                enqueue_job(&self.pool, &Job::ProcessActionsForScan { scan_id: scan.id }).await;
                Ok(scan.id)
            }
            Err(err) => {
                tracing::error!(scan_id = scan.id, error = ?err, "scan failed");
                let _ = scans::mark_failed(&self.pool, scan.id, &err.to_string()).await;
                Err(err)
            }
        }
    }

    async fn run(&self, scan_id: i64) -> Result<(), ScanError> {
        let config = self.config_loader.load(self.client.as_ref()).await?;
        tracing::info!(policy_count = config.policies.len(), "configuration loaded");

        let live_repos = self.client.list_organization_repositories().await?;
        tracing::info!(repo_count = live_repos.len(), "repositories fetched");

        let mut tx = self.pool.begin().await?;

        // Sync policies: upsert a row per configured policy type.
        let mut policy_ids = std::collections::HashMap::new();
        for policy_config in &config.policies {
            let action_spec_json = serde_json::to_string(&policy_config.action).unwrap_or_default();
            let policy = policies::upsert(
                &mut *tx,
                &policy_config.policy_type,
                &policy_config.name,
                &policy_config.action,
            )
            .await?;
            tracing::debug!(policy_key = %policy_config.policy_type, action_spec = %action_spec_json, "policy synced");
            policy_ids.insert(policy_config.policy_type.clone(), policy.id);
        }

        // Sync repositories: upsert live repos, delete stale ones.
        let mut stored = Vec::with_capacity(live_repos.len());
        for repo in &live_repos {
            let row = repositories::upsert(&mut *tx, repo.platform_repository_id, &repo.full_name)
                .await?;
            stored.push((repo.clone(), row.id));
        }
        let live_ids: Vec<i64> = live_repos.iter().map(|r| r.platform_repository_id).collect();
        let deleted = repositories::delete_missing(&mut *tx, &live_ids).await?;
        if deleted > 0 {
            tracing::info!(deleted, "removed repositories no longer present on the platform");
        }

        tx.commit().await?;

        // Evaluate each live repository; order across repositories is
        // unspecified (spec §5).
        for (repo, repository_id) in &stored {
            let found = policy_registry::evaluate_repository(
                repo,
                self.client.as_ref(),
                &config.policies,
            )
            .await;

            let found = match found {
                Ok(found) => found,
                Err(err) => {
                    tracing::warn!(repository = %repo.full_name, error = ?err, "policy evaluation failed for repository");
                    continue;
                }
            };

            let mut violation_count = 0;
            for (policy_type, _violation) in &found {
                let Some(policy_id) = policy_ids.get(policy_type) else {
                    continue;
                };
                match violations::insert(&self.pool, scan_id, *repository_id, *policy_id).await {
                    Ok(_) => violation_count += 1,
                    Err(err) if violations::is_unique_violation(&err) => {
                        tracing::debug!(repository = %repo.full_name, policy_type, "duplicate violation ignored");
                    }
                    Err(err) => return Err(err.into()),
                }
            }

            let status = if violation_count == 0 { "compliant" } else { "non_compliant" };
            repositories::mark_scanned(&self.pool, *repository_id, status).await?;
        }

        Ok(())
    }
}
