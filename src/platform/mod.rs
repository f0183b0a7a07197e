//! Authenticated, rate-limit-aware access to the platform's REST surface (C1).

mod auth;
mod github;
mod types;

pub use auth::InstallationTokenCache;
pub use github::GithubAppClient;
pub use types::*;

use async_trait::async_trait;
use thiserror::Error;

/// Error taxonomy for outbound platform calls (spec §7).
#[derive(Debug, Error, Clone)]
pub enum PlatformError {
    #[error("platform authentication failed")]
    AuthFailure,
    #[error("rate limited, retry after {retry_after_seconds}s")]
    RateLimited { retry_after_seconds: u64 },
    #[error("resource not found on platform")]
    NotFound,
    #[error("platform server error: {0}")]
    ServerError(String),
    #[error("unexpected platform response: {0}")]
    Unexpected(String),
}

/// The full contract a scan/action/webhook component needs from the platform.
///
/// Kept as a trait so C5/C6/C7/C9 can be driven against a mock in tests,
/// mirroring the `ContainerRuntime` trait-object pattern used elsewhere in
/// this codebase.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn list_organization_repositories(&self) -> Result<Vec<RepositorySummary>, PlatformError>;

    async fn get_repository(&self, platform_repository_id: i64) -> Result<RepositorySummary, PlatformError>;

    async fn get_file_content(
        &self,
        repo_full_name: &str,
        path: &str,
    ) -> Result<Option<FileContent>, PlatformError>;

    async fn file_exists(&self, repo_full_name: &str, path: &str) -> Result<bool, PlatformError> {
        Ok(self.get_file_content(repo_full_name, path).await?.is_some())
    }

    async fn get_workflow_permissions(
        &self,
        repo_full_name: &str,
    ) -> Result<Option<WorkflowPermissions>, PlatformError>;

    async fn create_issue(
        &self,
        repo_full_name: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue, PlatformError>;

    async fn list_open_issues_with_label(
        &self,
        repo_full_name: &str,
        label: &str,
    ) -> Result<Vec<Issue>, PlatformError>;

    async fn archive_repository(&self, repo_full_name: &str) -> Result<(), PlatformError>;

    async fn comment_on_pull_request(
        &self,
        repo_full_name: &str,
        pr_number: i64,
        body: &str,
    ) -> Result<Comment, PlatformError>;

    async fn list_pull_request_comments(
        &self,
        repo_full_name: &str,
        pr_number: i64,
    ) -> Result<Vec<Comment>, PlatformError>;

    async fn set_status_check(
        &self,
        repo_full_name: &str,
        head_sha: &str,
        context: &str,
        state: StatusState,
        description: &str,
    ) -> Result<(), PlatformError>;

    async fn check_team_membership(
        &self,
        org: &str,
        team_slug: &str,
        username: &str,
        user_access_token: &str,
    ) -> Result<bool, PlatformError>;
}
