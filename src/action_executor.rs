//! Turns persisted policy violations into platform-side effects (C6, spec §4.6).

use std::sync::Arc;

use sqlx::PgPool;
use thiserror::Error;

use crate::config_loader::{ConfigLoader, IssueDetails};
use crate::db::{action_logs::{self, ActionLogStatus}, violations};
use crate::platform::{PlatformClient, PlatformError, StatusState};

#[derive(Debug, Error)]
pub enum ActionError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
}

/// Labels applied to a `create-issue` policy's issue when the policy's
/// `issue_details.labels` is absent or empty (spec §4.6).
const DEFAULT_ISSUE_LABELS: &[&str] = &["policy-violation", "compliance"];

/// Outcome of `create_issue`'s dedup check, distinct from a platform error so
/// the caller can log `Skipped` (with the duplicate's URL) rather than
/// folding it into the same `Success` bucket as a freshly created issue.
enum IssueOutcome {
    Created { html_url: String },
    AlreadyOpen { html_url: String },
}

pub struct ActionExecutor {
    pool: PgPool,
    client: Arc<dyn PlatformClient>,
    config_loader: Arc<ConfigLoader>,
}

impl ActionExecutor {
    pub fn new(pool: PgPool, client: Arc<dyn PlatformClient>, config_loader: Arc<ConfigLoader>) -> Self {
        Self {
            pool,
            client,
            config_loader,
        }
    }

    /// Processes every violation recorded for `scan_id`, dispatching the
    /// configured action for each `(repository, policy)` pair.
    pub async fn process_actions_for_scan(&self, scan_id: i64) -> Result<(), ActionError> {
        let found = violations::list_for_scan(&self.pool, scan_id).await?;
        tracing::info!(scan_id, violation_count = found.len(), "processing actions for scan");

        for violation in found {
            self.dispatch_for_violation(&violation).await;
        }
        Ok(())
    }

    async fn dispatch_for_violation(&self, violation: &violations::ViolationWithContext) {
        let policy = match crate::db::policies::get_by_key(&self.pool, &violation.policy_key).await
        {
            Ok(Some(policy)) => policy,
            Ok(None) => {
                tracing::warn!(policy_key = %violation.policy_key, "policy vanished before action processing");
                return;
            }
            Err(err) => {
                tracing::error!(error = ?err, "failed to load policy for action dispatch");
                return;
            }
        };

        let tags: Vec<String> = serde_json::from_value(policy.action_spec.clone()).unwrap_or_default();

        let policy_config = match self.config_loader.load(self.client.as_ref()).await {
            Ok(app_config) => app_config
                .policies
                .iter()
                .find(|p| p.policy_type == violation.policy_key)
                .cloned(),
            Err(err) => {
                tracing::warn!(error = ?err, "failed to load policy configuration for action dispatch, falling back to defaults");
                None
            }
        };
        let issue_details = policy_config.as_ref().and_then(|p| p.issue_details.as_ref());

        for raw_tag in &tags {
            let tag = normalize_action_name(raw_tag);
            let (status, details) = match tag.as_str() {
                "create-issue" => match self.create_issue(violation, issue_details).await {
                    Ok(IssueOutcome::Created { html_url }) => (ActionLogStatus::Success, Some(html_url)),
                    Ok(IssueOutcome::AlreadyOpen { html_url }) => (ActionLogStatus::Skipped, Some(html_url)),
                    Err(err) => (ActionLogStatus::Failed, Some(err.to_string())),
                },
                "archive-repo" => match self.archive_repo(violation).await {
                    Ok(()) => {
                        let name = policy_config.as_ref().map(|p| p.name.clone());
                        (ActionLogStatus::Success, name)
                    }
                    Err(err) => (ActionLogStatus::Failed, Some(err.to_string())),
                },
                "log-only" => (
                    ActionLogStatus::Success,
                    Some("no platform action configured for this policy".to_string()),
                ),
                other => {
                    tracing::warn!(action_tag = other, "unrecognized action tag, skipping");
                    continue;
                }
            };

            if let Err(log_err) = action_logs::record(
                &self.pool,
                violation.repository_id,
                violation.policy_id,
                &tag,
                status,
                details.as_deref(),
            )
            .await
            {
                tracing::error!(error = ?log_err, "failed to record action log");
            }
        }
    }

    async fn create_issue(
        &self,
        violation: &violations::ViolationWithContext,
        issue_details: Option<&IssueDetails>,
    ) -> Result<IssueOutcome, PlatformError> {
        let title = issue_details
            .and_then(|d| d.title.clone())
            .unwrap_or_else(|| format!("Compliance Violation: {}", violation.policy_key));
        let body = issue_details.and_then(|d| d.body.clone()).unwrap_or_else(|| {
            format!(
                "This repository does not satisfy the `{}` policy.\n\n{}",
                violation.policy_key, violation.policy_description
            )
        });
        let labels: Vec<String> = match issue_details.map(|d| &d.labels) {
            Some(labels) if !labels.is_empty() => labels.clone(),
            _ => DEFAULT_ISSUE_LABELS.iter().map(|s| s.to_string()).collect(),
        };
        let dedup_label = &labels[0];

        let existing = self
            .client
            .list_open_issues_with_label(&violation.repository_name, dedup_label)
            .await?;
        if let Some(issue) = existing.iter().find(|issue| issue.title.eq_ignore_ascii_case(&title)) {
            tracing::debug!(repository = %violation.repository_name, policy_key = %violation.policy_key, "issue already open, skipping create");
            return Ok(IssueOutcome::AlreadyOpen {
                html_url: issue.html_url.clone(),
            });
        }

        let issue = self
            .client
            .create_issue(&violation.repository_name, &title, &body, &labels)
            .await?;
        Ok(IssueOutcome::Created {
            html_url: issue.html_url,
        })
    }

    async fn archive_repo(
        &self,
        violation: &violations::ViolationWithContext,
    ) -> Result<(), PlatformError> {
        self.client
            .archive_repository(&violation.repository_name)
            .await
    }

    /// Posts a policy-status comment on a pull request, invoked from the
    /// webhook handler (C7) rather than from a scan.
    pub async fn comment_on_pr(
        &self,
        repo_full_name: &str,
        pr_number: i64,
        policy_key: &str,
        message: &str,
    ) -> Result<(), PlatformError> {
        let marker = format!("<!-- policy-bot:marker:{} -->", policy_key);
        let existing = self
            .client
            .list_pull_request_comments(repo_full_name, pr_number)
            .await?;
        if let Some(comment) = existing.iter().find(|c| c.body.contains(&marker)) {
            tracing::debug!(comment_id = comment.id, "marker comment already present, skipping");
            return Ok(());
        }
        let body = format!("{}\n{}", message, marker);
        self.client
            .comment_on_pull_request(repo_full_name, pr_number, &body)
            .await?;
        Ok(())
    }

    /// Sets the policy status check on a commit for `block-prs` policies.
    /// `violating_policy_types` lists the policies this PR's repository
    /// currently fails; an empty list means the check passes.
    pub async fn update_pr_status(
        &self,
        repo_full_name: &str,
        head_sha: &str,
        context: &str,
        violating_policy_types: &[String],
    ) -> Result<(), PlatformError> {
        let (state, description) = if violating_policy_types.is_empty() {
            (StatusState::Success, "All configured policies are satisfied.".to_string())
        } else {
            (
                StatusState::Failure,
                format!("Policy violations: {}", violating_policy_types.join(", ")),
            )
        };
        self.client
            .set_status_check(repo_full_name, head_sha, context, state, &description)
            .await
    }
}

/// Normalizes an action tag: lowercase, trimmed, internal whitespace/underscores
/// collapsed to a single hyphen (spec R3: `"Create_Issue"`, `" create-issue "`,
/// and `"create issue"` all normalize to `"create-issue"`).
pub fn normalize_action_name(raw: &str) -> String {
    raw.trim()
        .to_ascii_lowercase()
        .split(|c: char| c == '_' || c == ' ' || c == '-')
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join("-")
}
