use async_trait::async_trait;
use base64::Engine;
use rand::Rng;
use reqwest::{Client, Method, StatusCode};
use serde_json::{json, Value};
use std::time::Duration as StdDuration;

use super::auth::InstallationTokenCache;
use super::types::*;
use super::PlatformError;

const DEFAULT_TIMEOUT_SECS: u64 = 30;
const FILE_CONTENT_TIMEOUT_SECS: u64 = 60;
const MAX_SERVER_ERROR_ATTEMPTS: u32 = 5;
const BACKOFF_BASE_SECS: u64 = 1;
const BACKOFF_CAP_SECS: u64 = 30;

/// Installation-scoped GitHub App client. Every outbound call goes through
/// `send`, which attaches a fresh/cached installation token, retries
/// transient 5xx responses with capped exponential backoff and jitter, and
/// translates hard rate limits into a typed error the caller decides how to
/// handle (spec §4.1).
pub struct GithubAppClient {
    http: Client,
    base_url: String,
    installation_id: String,
    org: String,
    tokens: InstallationTokenCache,
}

impl GithubAppClient {
    pub fn new(org: String, installation_id: String, base_url: String) -> Self {
        let http = Client::builder()
            .user_agent("repo-policy-engine")
            .build()
            .expect("failed to build http client");
        Self {
            http,
            base_url,
            installation_id,
            org,
            tokens: InstallationTokenCache::new(),
        }
    }

    async fn installation_token(&self) -> Result<String, PlatformError> {
        let base_url = self.base_url.clone();
        let installation_id = self.installation_id.clone();
        let http = self.http.clone();
        self.tokens
            .get_token(move |app_jwt| async move {
                let url = format!("{base_url}/app/installations/{installation_id}/access_tokens");
                let response = http
                    .post(&url)
                    .bearer_auth(app_jwt)
                    .header("Accept", "application/vnd.github+json")
                    .timeout(StdDuration::from_secs(DEFAULT_TIMEOUT_SECS))
                    .send()
                    .await
                    .map_err(|e| PlatformError::Unexpected(e.to_string()))?;
                if response.status() == StatusCode::UNAUTHORIZED
                    || response.status() == StatusCode::FORBIDDEN
                {
                    return Err(PlatformError::AuthFailure);
                }
                let body: Value = response
                    .json()
                    .await
                    .map_err(|e| PlatformError::Unexpected(e.to_string()))?;
                let token = body["token"]
                    .as_str()
                    .ok_or_else(|| PlatformError::Unexpected("missing token field".into()))?
                    .to_string();
                let expires_at = body["expires_at"]
                    .as_str()
                    .and_then(|s| chrono::DateTime::parse_from_rfc3339(s).ok())
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|| chrono::Utc::now() + chrono::Duration::minutes(10));
                Ok((token, expires_at))
            })
            .await
    }

    /// Sends one request, retrying transient 5xx responses and translating
    /// hard rate limits (429, or 403 carrying a secondary-limit marker) into
    /// `PlatformError::RateLimited`. Callers decide whether to requeue.
    async fn send(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout_secs: u64,
    ) -> Result<reqwest::Response, PlatformError> {
        let mut attempt: u32 = 0;
        loop {
            let token = self.installation_token().await?;
            let url = format!("{}{}", self.base_url, path);
            let mut request = self
                .http
                .request(method.clone(), &url)
                .bearer_auth(&token)
                .header("Accept", "application/vnd.github+json")
                .timeout(StdDuration::from_secs(timeout_secs));
            if let Some(ref payload) = body {
                request = request.json(payload);
            }
            let response = request
                .send()
                .await
                .map_err(|e| PlatformError::Unexpected(e.to_string()))?;

            let status = response.status();
            if status == StatusCode::NOT_FOUND {
                return Err(PlatformError::NotFound);
            }
            if status == StatusCode::TOO_MANY_REQUESTS || is_secondary_rate_limit(&response) {
                let retry_after_seconds = retry_after_seconds(&response);
                return Err(PlatformError::RateLimited {
                    retry_after_seconds,
                });
            }
            if status == StatusCode::UNAUTHORIZED {
                self.tokens.invalidate().await;
                return Err(PlatformError::AuthFailure);
            }
            if status.is_server_error() {
                attempt += 1;
                if attempt >= MAX_SERVER_ERROR_ATTEMPTS {
                    return Err(PlatformError::ServerError(format!(
                        "platform returned {status} after {attempt} attempts"
                    )));
                }
                let delay = backoff_delay(attempt);
                tracing::warn!(%status, attempt, "platform server error, retrying");
                tokio::time::sleep(delay).await;
                continue;
            }
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                return Err(PlatformError::Unexpected(format!("{status}: {text}")));
            }
            return Ok(response);
        }
    }

    async fn json<T: serde::de::DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        timeout_secs: u64,
    ) -> Result<T, PlatformError> {
        let response = self.send(method, path, body, timeout_secs).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| PlatformError::Unexpected(e.to_string()))
    }
}

fn is_secondary_rate_limit(response: &reqwest::Response) -> bool {
    if response.status() != StatusCode::FORBIDDEN {
        return false;
    }
    response
        .headers()
        .get("retry-after")
        .is_some()
}

fn retry_after_seconds(response: &reqwest::Response) -> u64 {
    response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(60)
}

fn backoff_delay(attempt: u32) -> StdDuration {
    let base = BACKOFF_BASE_SECS.saturating_mul(1u64 << attempt.min(5)).min(BACKOFF_CAP_SECS);
    let jitter_ms = rand::thread_rng().gen_range(0..250);
    StdDuration::from_millis(base * 1000 + jitter_ms)
}

#[async_trait]
impl super::PlatformClient for GithubAppClient {
    async fn list_organization_repositories(&self) -> Result<Vec<RepositorySummary>, PlatformError> {
        let mut all = Vec::new();
        let mut page = 1u32;
        loop {
            let path = format!(
                "/orgs/{}/repos?per_page=100&page={}",
                self.org, page
            );
            let rows: Vec<Value> = self.json(Method::GET, &path, None, DEFAULT_TIMEOUT_SECS).await?;
            if rows.is_empty() {
                break;
            }
            let count = rows.len();
            for row in rows {
                all.push(parse_repository_summary(&row)?);
            }
            if count < 100 {
                break;
            }
            page += 1;
        }
        Ok(all)
    }

    async fn get_repository(&self, platform_repository_id: i64) -> Result<RepositorySummary, PlatformError> {
        let path = format!("/repositories/{platform_repository_id}");
        let row: Value = self.json(Method::GET, &path, None, DEFAULT_TIMEOUT_SECS).await?;
        parse_repository_summary(&row)
    }

    async fn get_file_content(
        &self,
        repo_full_name: &str,
        path: &str,
    ) -> Result<Option<FileContent>, PlatformError> {
        let url_path = format!("/repos/{repo_full_name}/contents/{path}");
        match self
            .json::<Value>(Method::GET, &url_path, None, FILE_CONTENT_TIMEOUT_SECS)
            .await
        {
            Ok(row) => {
                let encoded = row["content"]
                    .as_str()
                    .ok_or_else(|| PlatformError::Unexpected("missing content field".into()))?;
                let cleaned: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(cleaned)
                    .map_err(|e| PlatformError::Unexpected(format!("bad base64 content: {e}")))?;
                let text = String::from_utf8(bytes.clone()).ok();
                Ok(Some(FileContent { bytes, text }))
            }
            Err(PlatformError::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn get_workflow_permissions(
        &self,
        repo_full_name: &str,
    ) -> Result<Option<WorkflowPermissions>, PlatformError> {
        let path = format!("/repos/{repo_full_name}/actions/permissions/workflow");
        match self
            .json::<Value>(Method::GET, &path, None, DEFAULT_TIMEOUT_SECS)
            .await
        {
            Ok(row) => match row["default_workflow_permissions"].as_str() {
                Some("read") => Ok(Some(WorkflowPermissions::Read)),
                Some("write") => Ok(Some(WorkflowPermissions::Write)),
                _ => Ok(None),
            },
            Err(PlatformError::NotFound) => Ok(None),
            Err(other) => Err(other),
        }
    }

    async fn create_issue(
        &self,
        repo_full_name: &str,
        title: &str,
        body: &str,
        labels: &[String],
    ) -> Result<Issue, PlatformError> {
        let path = format!("/repos/{repo_full_name}/issues");
        let payload = json!({ "title": title, "body": body, "labels": labels });
        let row: Value = self
            .json(Method::POST, &path, Some(payload), DEFAULT_TIMEOUT_SECS)
            .await?;
        parse_issue(&row)
    }

    async fn list_open_issues_with_label(
        &self,
        repo_full_name: &str,
        label: &str,
    ) -> Result<Vec<Issue>, PlatformError> {
        let path = format!(
            "/repos/{repo_full_name}/issues?state=open&labels={}",
            urlencoding_minimal(label)
        );
        let rows: Vec<Value> = self.json(Method::GET, &path, None, DEFAULT_TIMEOUT_SECS).await?;
        rows.iter().map(parse_issue).collect()
    }

    async fn archive_repository(&self, repo_full_name: &str) -> Result<(), PlatformError> {
        let path = format!("/repos/{repo_full_name}");
        let payload = json!({ "archived": true });
        self.send(Method::PATCH, &path, Some(payload), DEFAULT_TIMEOUT_SECS)
            .await?;
        Ok(())
    }

    async fn comment_on_pull_request(
        &self,
        repo_full_name: &str,
        pr_number: i64,
        body: &str,
    ) -> Result<Comment, PlatformError> {
        let path = format!("/repos/{repo_full_name}/issues/{pr_number}/comments");
        let payload = json!({ "body": body });
        let row: Value = self
            .json(Method::POST, &path, Some(payload), DEFAULT_TIMEOUT_SECS)
            .await?;
        parse_comment(&row)
    }

    async fn list_pull_request_comments(
        &self,
        repo_full_name: &str,
        pr_number: i64,
    ) -> Result<Vec<Comment>, PlatformError> {
        let path = format!("/repos/{repo_full_name}/issues/{pr_number}/comments");
        let rows: Vec<Value> = self.json(Method::GET, &path, None, DEFAULT_TIMEOUT_SECS).await?;
        rows.iter().map(parse_comment).collect()
    }

    async fn set_status_check(
        &self,
        repo_full_name: &str,
        head_sha: &str,
        context: &str,
        state: StatusState,
        description: &str,
    ) -> Result<(), PlatformError> {
        let path = format!("/repos/{repo_full_name}/statuses/{head_sha}");
        let state_str = match state {
            StatusState::Success => "success",
            StatusState::Failure => "failure",
            StatusState::Pending => "pending",
        };
        let payload = json!({
            "state": state_str,
            "context": context,
            "description": description,
        });
        self.send(Method::POST, &path, Some(payload), DEFAULT_TIMEOUT_SECS)
            .await?;
        Ok(())
    }

    async fn check_team_membership(
        &self,
        org: &str,
        team_slug: &str,
        username: &str,
        user_access_token: &str,
    ) -> Result<bool, PlatformError> {
        let url = format!("{}/orgs/{org}/teams/{team_slug}/memberships/{username}", self.base_url);
        let response = self
            .http
            .get(&url)
            .bearer_auth(user_access_token)
            .header("Accept", "application/vnd.github+json")
            .timeout(StdDuration::from_secs(DEFAULT_TIMEOUT_SECS))
            .send()
            .await
            .map_err(|e| PlatformError::Unexpected(e.to_string()))?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(false);
        }
        if !response.status().is_success() {
            return Ok(false);
        }
        let row: Value = response
            .json()
            .await
            .map_err(|e| PlatformError::Unexpected(e.to_string()))?;
        Ok(row["state"].as_str() == Some("active"))
    }
}

fn parse_repository_summary(row: &Value) -> Result<RepositorySummary, PlatformError> {
    Ok(RepositorySummary {
        platform_repository_id: row["id"]
            .as_i64()
            .ok_or_else(|| PlatformError::Unexpected("missing repository id".into()))?,
        full_name: row["full_name"]
            .as_str()
            .ok_or_else(|| PlatformError::Unexpected("missing full_name".into()))?
            .to_string(),
        default_branch: row["default_branch"].as_str().unwrap_or("main").to_string(),
        archived: row["archived"].as_bool().unwrap_or(false),
    })
}

fn parse_issue(row: &Value) -> Result<Issue, PlatformError> {
    let labels = row["labels"]
        .as_array()
        .map(|arr| {
            arr.iter()
                .filter_map(|l| l["name"].as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();
    Ok(Issue {
        number: row["number"]
            .as_i64()
            .ok_or_else(|| PlatformError::Unexpected("missing issue number".into()))?,
        title: row["title"].as_str().unwrap_or_default().to_string(),
        html_url: row["html_url"].as_str().unwrap_or_default().to_string(),
        state: row["state"].as_str().unwrap_or("open").to_string(),
        labels,
    })
}

fn parse_comment(row: &Value) -> Result<Comment, PlatformError> {
    Ok(Comment {
        id: row["id"]
            .as_i64()
            .ok_or_else(|| PlatformError::Unexpected("missing comment id".into()))?,
        body: row["body"].as_str().unwrap_or_default().to_string(),
        html_url: row["html_url"].as_str().unwrap_or_default().to_string(),
    })
}

fn urlencoding_minimal(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}
