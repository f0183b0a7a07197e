//! Fetches, parses, validates, and caches the organization-wide policy
//! document (C2). The document lives at `.github/config.yaml` in the
//! organization's `.github` repository.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::platform::{PlatformClient, PlatformError};

const CONFIG_PATH: &str = "config.yaml";
const CONFIG_REPO: &str = ".github";
const CACHE_TTL: StdDuration = StdDuration::from_secs(15 * 60);

#[derive(Debug, Error, Clone)]
pub enum ConfigError {
    #[error("configuration not found")]
    NotFound,
    #[error("invalid configuration: {0}")]
    Invalid(String),
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    pub access_control: AccessControl,
    #[serde(default)]
    pub policies: Vec<PolicyConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AccessControl {
    pub authorized_team: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PolicyConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub policy_type: String,
    #[serde(deserialize_with = "deserialize_action_list")]
    pub action: Vec<String>,
    pub issue_details: Option<IssueDetails>,
    pub pr_comment_details: Option<PrCommentDetails>,
    pub block_prs_details: Option<BlockPrsDetails>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct IssueDetails {
    pub title: Option<String>,
    pub body: Option<String>,
    #[serde(default)]
    pub labels: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PrCommentDetails {
    pub message: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BlockPrsDetails {
    pub status_check_name: Option<String>,
}

/// Normalizes the `action` field's scalar-or-list polymorphism (spec §4.2,
/// §9) into a non-empty list of trimmed tags.
fn deserialize_action_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum ScalarOrList {
        Scalar(String),
        List(Vec<String>),
    }
    let raw = ScalarOrList::deserialize(deserializer)?;
    let list = match raw {
        ScalarOrList::Scalar(s) => vec![s],
        ScalarOrList::List(list) => list,
    };
    Ok(list
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect())
}

struct CachedConfig {
    config: Arc<AppConfig>,
    fetched_at: DateTime<Utc>,
}

/// Caches the parsed configuration for 15 minutes with sliding expiration,
/// guarded by a mutex with double-checked cache lookup to avoid
/// thundering-herd fetches (spec §4.2).
pub struct ConfigLoader {
    cached: Mutex<Option<CachedConfig>>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            cached: Mutex::new(None),
        }
    }

    pub async fn load(&self, client: &dyn PlatformClient) -> Result<Arc<AppConfig>, ConfigError> {
        {
            let mut guard = self.cached.lock().await;
            if let Some(cached) = guard.as_mut() {
                if Utc::now() - cached.fetched_at < chrono::Duration::from_std(CACHE_TTL).unwrap() {
                    cached.fetched_at = Utc::now();
                    return Ok(cached.config.clone());
                }
            }
        }

        let mut guard = self.cached.lock().await;
        if let Some(cached) = guard.as_mut() {
            if Utc::now() - cached.fetched_at < chrono::Duration::from_std(CACHE_TTL).unwrap() {
                cached.fetched_at = Utc::now();
                return Ok(cached.config.clone());
            }
        }

        let config = Arc::new(fetch_and_parse(client).await?);
        *guard = Some(CachedConfig {
            config: config.clone(),
            fetched_at: Utc::now(),
        });
        Ok(config)
    }

    pub async fn invalidate(&self) {
        let mut guard = self.cached.lock().await;
        *guard = None;
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

async fn fetch_and_parse(client: &dyn PlatformClient) -> Result<AppConfig, ConfigError> {
    let repo_full_name = format!("{}/{}", crate::config::GITHUB_ORG.as_str(), CONFIG_REPO);
    let content = client
        .get_file_content(&repo_full_name, CONFIG_PATH)
        .await?
        .ok_or(ConfigError::NotFound)?;
    let text = content
        .text
        .ok_or_else(|| ConfigError::Invalid("config.yaml is not valid UTF-8".into()))?;
    let config: AppConfig =
        serde_yaml::from_str(&text).map_err(|e| ConfigError::Invalid(e.to_string()))?;
    if config.access_control.authorized_team.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "access_control.authorized_team must be non-empty".into(),
        ));
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_scalar_action_to_list() {
        let yaml = r#"
access_control:
  authorized_team: "acme/platform"
policies:
  - name: "Require AGENTS.md"
    type: has_agents_md
    action: create-issue
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.policies[0].action, vec!["create-issue".to_string()]);
    }

    #[test]
    fn normalizes_list_action_and_trims_entries() {
        let yaml = r#"
access_control:
  authorized_team: "acme/platform"
policies:
  - name: "Block on violation"
    type: has_agents_md
    action: [" comment-on-prs ", "block-prs"]
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(
            config.policies[0].action,
            vec!["comment-on-prs".to_string(), "block-prs".to_string()]
        );
    }

    #[test]
    fn rejects_empty_authorized_team() {
        let yaml = r#"
access_control:
  authorized_team: ""
policies: []
"#;
        let config: AppConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.access_control.authorized_team.trim().is_empty());
    }
}
