//! Pluggable policy evaluators dispatched by a case-insensitive policy-type
//! tag (C3, spec §4.3).

use std::sync::Arc;

use async_trait::async_trait;
use once_cell::sync::Lazy;
use serde::Deserialize;
use thiserror::Error;

use crate::config_loader::PolicyConfig;
use crate::platform::{PlatformClient, PlatformError, RepositorySummary, WorkflowPermissions};

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("platform error: {0}")]
    Platform(#[from] PlatformError),
    #[error("failed to parse {0}: {1}")]
    Malformed(String, String),
}

/// A finding of one policy against one repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    pub policy_type: String,
}

/// Contract an evaluator implements: check one policy type against one
/// repository. `policy_type()` is matched case-insensitively against
/// `PolicyConfig.policy_type`.
#[async_trait]
pub trait PolicyEvaluator: Send + Sync {
    fn policy_type(&self) -> &'static str;

    async fn evaluate(
        &self,
        repo: &RepositorySummary,
        client: &dyn PlatformClient,
    ) -> Result<Option<Violation>, PolicyError>;
}

struct HasAgentsMd;

#[async_trait]
impl PolicyEvaluator for HasAgentsMd {
    fn policy_type(&self) -> &'static str {
        "has_agents_md"
    }

    async fn evaluate(
        &self,
        repo: &RepositorySummary,
        client: &dyn PlatformClient,
    ) -> Result<Option<Violation>, PolicyError> {
        let exists = client.file_exists(&repo.full_name, "AGENTS.md").await?;
        Ok(if exists {
            None
        } else {
            Some(Violation {
                policy_type: self.policy_type().to_string(),
            })
        })
    }
}

struct HasCatalogInfoYaml;

#[async_trait]
impl PolicyEvaluator for HasCatalogInfoYaml {
    fn policy_type(&self) -> &'static str {
        "has_catalog_info_yaml"
    }

    async fn evaluate(
        &self,
        repo: &RepositorySummary,
        client: &dyn PlatformClient,
    ) -> Result<Option<Violation>, PolicyError> {
        let exists = client
            .file_exists(&repo.full_name, "catalog-info.yaml")
            .await?;
        Ok(if exists {
            None
        } else {
            Some(Violation {
                policy_type: self.policy_type().to_string(),
            })
        })
    }
}

#[derive(Debug, Deserialize, Default)]
struct CatalogInfo {
    #[serde(default)]
    spec: Option<CatalogSpec>,
}

#[derive(Debug, Deserialize, Default)]
struct CatalogSpec {
    #[serde(default)]
    owner: Option<String>,
}

struct CatalogInfoHasOwner;

#[async_trait]
impl PolicyEvaluator for CatalogInfoHasOwner {
    fn policy_type(&self) -> &'static str {
        "catalog_info_has_owner"
    }

    async fn evaluate(
        &self,
        repo: &RepositorySummary,
        client: &dyn PlatformClient,
    ) -> Result<Option<Violation>, PolicyError> {
        let Some(content) = client
            .get_file_content(&repo.full_name, "catalog-info.yaml")
            .await?
        else {
            // has_catalog_info_yaml owns the missing-file violation.
            return Ok(None);
        };
        let Some(text) = content.text else {
            return Ok(None);
        };
        let parsed: CatalogInfo = serde_yaml::from_str(&text)
            .map_err(|e| PolicyError::Malformed("catalog-info.yaml".into(), e.to_string()))?;
        let owner = parsed.spec.and_then(|s| s.owner).unwrap_or_default();
        Ok(if owner.trim().is_empty() {
            Some(Violation {
                policy_type: self.policy_type().to_string(),
            })
        } else {
            None
        })
    }
}

struct CorrectWorkflowPermissions;

#[async_trait]
impl PolicyEvaluator for CorrectWorkflowPermissions {
    fn policy_type(&self) -> &'static str {
        "correct_workflow_permissions"
    }

    async fn evaluate(
        &self,
        repo: &RepositorySummary,
        client: &dyn PlatformClient,
    ) -> Result<Option<Violation>, PolicyError> {
        let permissions = client.get_workflow_permissions(&repo.full_name).await?;
        Ok(match permissions {
            None => None,
            Some(WorkflowPermissions::Read) => None,
            Some(WorkflowPermissions::Write) => Some(Violation {
                policy_type: self.policy_type().to_string(),
            }),
        })
    }
}

static EVALUATORS: Lazy<Vec<Arc<dyn PolicyEvaluator>>> = Lazy::new(|| {
    vec![
        Arc::new(HasAgentsMd),
        Arc::new(HasCatalogInfoYaml),
        Arc::new(CatalogInfoHasOwner),
        Arc::new(CorrectWorkflowPermissions),
    ]
});

fn find_evaluator(policy_type: &str) -> Option<Arc<dyn PolicyEvaluator>> {
    EVALUATORS
        .iter()
        .find(|e| e.policy_type().eq_ignore_ascii_case(policy_type))
        .cloned()
}

/// Evaluates every configured policy against one repository, collecting all
/// produced violations. Policies with no matching evaluator are skipped
/// with a warning.
pub async fn evaluate_repository(
    repo: &RepositorySummary,
    client: &dyn PlatformClient,
    policies: &[PolicyConfig],
) -> Result<Vec<(String, Violation)>, PolicyError> {
    let mut violations = Vec::new();
    for policy in policies {
        let Some(evaluator) = find_evaluator(&policy.policy_type) else {
            tracing::warn!(policy_type = %policy.policy_type, "no evaluator registered for policy type");
            continue;
        };
        if let Some(violation) = evaluator.evaluate(repo, client).await? {
            violations.push((policy.policy_type.clone(), violation));
        }
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(find_evaluator("HAS_AGENTS_MD").is_some());
        assert!(find_evaluator("Has_Agents_Md").is_some());
        assert!(find_evaluator("unknown_policy").is_none());
    }

    #[test]
    fn catalog_info_owner_parsing_treats_blank_owner_as_missing() {
        let parsed: CatalogInfo = serde_yaml::from_str("spec:\n  owner: \"   \"\n").unwrap();
        let owner = parsed.spec.and_then(|s| s.owner).unwrap_or_default();
        assert!(owner.trim().is_empty());
    }
}
