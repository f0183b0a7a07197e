use axum::{extract::Extension, http::HeaderMap};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::Value;
use sha2::Sha256;
use sqlx::PgPool;
use subtle::ConstantTimeEq;

use crate::config;
use crate::error::{AppError, AppResult};
use crate::job_queue::{enqueue_job, Job};

#[derive(Debug, Deserialize)]
struct PullRequestPayload {
    action: String,
    number: i64,
    pull_request: PullRequest,
    repository: RepositoryRef,
}

#[derive(Debug, Deserialize)]
struct PullRequest {
    head: Commit,
}

#[derive(Debug, Deserialize)]
struct Commit {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct RepositoryRef {
    full_name: String,
}

/// Computes the expected `sha256=<hex>` digest for `body` under `secret` and
/// compares it to `sig_header` in constant time. Unlike a naive `!=`
/// comparison, this can't leak the expected digest one byte at a time
/// through response-timing measurements.
fn verify_signature(secret: &str, body: &[u8], sig_header: &str) -> bool {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(body);
    let expected = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));
    expected.as_bytes().ct_eq(sig_header.as_bytes()).unwrap_u8() == 1
}

/// Verifies a GitHub-style `X-Hub-Signature-256` and dispatches the event.
pub async fn github_webhook(
    Extension(pool): Extension<PgPool>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> AppResult<axum::http::StatusCode> {
    let sig_header = headers
        .get("x-hub-signature-256")
        .ok_or_else(|| AppError::BadRequest("missing x-hub-signature-256 header".into()))?;
    let sig = sig_header
        .to_str()
        .map_err(|_| AppError::BadRequest("signature header is not valid utf-8".into()))?;

    if !verify_signature(&config::GITHUB_WEBHOOK_SECRET, &body, sig) {
        tracing::warn!("rejected webhook with invalid signature");
        return Err(AppError::Unauthorized);
    }

    let event = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    match event.as_str() {
        "ping" => Ok(axum::http::StatusCode::OK),
        "pull_request" => {
            let payload: PullRequestPayload = serde_json::from_slice(&body)
                .map_err(|e| AppError::BadRequest(format!("malformed pull_request payload: {e}")))?;
            // Policies must be re-evaluated on every PR action (opened, synchronize,
            // edited, reopened, ready_for_review, closed, ...) so the status check
            // stays consistent with the repository's current state.
            enqueue_job(
                &pool,
                &Job::HandlePullRequest {
                    repo_full_name: payload.repository.full_name,
                    pr_number: payload.number,
                    head_sha: payload.pull_request.head.sha,
                },
            )
            .await;
            Ok(axum::http::StatusCode::ACCEPTED)
        }
        other => {
            tracing::debug!(event = other, "ignoring unhandled webhook event");
            Ok(axum::http::StatusCode::OK)
        }
    }
}

/// Re-evaluates a pull request's repository against the compliance policies
/// whose action list includes a PR-facing tag (`comment-on-prs`,
/// `block-prs`), and applies the corresponding platform side effect.
pub async fn handle_pull_request_job(
    pool: &PgPool,
    client: &dyn crate::platform::PlatformClient,
    config_loader: &crate::config_loader::ConfigLoader,
    action_executor: &crate::action_executor::ActionExecutor,
    repo_full_name: &str,
    pr_number: i64,
    head_sha: &str,
) -> Result<(), Value> {
    let app_config = config_loader
        .load(client)
        .await
        .map_err(|e| serde_json::json!({ "error": e.to_string() }))?;

    // Policy evaluators only read `full_name` off a RepositorySummary; the
    // webhook payload doesn't carry the platform-internal id or default
    // branch, so those fields are left at their zero values.
    let repo = crate::platform::RepositorySummary {
        platform_repository_id: 0,
        full_name: repo_full_name.to_string(),
        default_branch: String::new(),
        archived: false,
    };

    let found = crate::policy_registry::evaluate_repository(&repo, client, &app_config.policies)
        .await
        .map_err(|e| serde_json::json!({ "error": e.to_string() }))?;

    for policy_config in &app_config.policies {
        let violation = found.iter().find(|(t, _)| t == &policy_config.policy_type);
        let is_violating = violation.is_some();

        for raw_tag in &policy_config.action {
            let tag = crate::action_executor::normalize_action_name(raw_tag);
            match tag.as_str() {
                "comment-on-prs" if is_violating => {
                    let message = policy_config
                        .pr_comment_details
                        .as_ref()
                        .map(|d| d.message.clone())
                        .unwrap_or_else(|| format!("This pull request's repository violates the `{}` policy.", policy_config.policy_type));
                    if let Err(err) = action_executor
                        .comment_on_pr(repo_full_name, pr_number, &policy_config.policy_type, &message)
                        .await
                    {
                        tracing::warn!(error = ?err, "failed to comment on pull request");
                    }
                }
                "block-prs" => {
                    let context = policy_config
                        .block_prs_details
                        .as_ref()
                        .and_then(|d| d.status_check_name.clone())
                        .unwrap_or_else(|| "Policy Compliance Check".to_string());
                    let violating: Vec<String> = if is_violating {
                        vec![policy_config.policy_type.clone()]
                    } else {
                        vec![]
                    };
                    if let Err(err) = action_executor
                        .update_pr_status(repo_full_name, head_sha, &context, &violating)
                        .await
                    {
                        tracing::warn!(error = ?err, "failed to set PR status check");
                    }
                }
                _ => {}
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn accepts_a_correctly_signed_body() {
        let secret = "shhh";
        let body = br#"{"zen":"Speak like a human."}"#;
        let sig = sign(secret, body);
        assert!(verify_signature(secret, body, &sig));
    }

    #[test]
    fn rejects_a_tampered_body() {
        let secret = "shhh";
        let sig = sign(secret, b"original body");
        assert!(!verify_signature(secret, b"tampered body", &sig));
    }

    #[test]
    fn rejects_a_signature_from_the_wrong_secret() {
        let body = b"some payload";
        let sig = sign("wrong-secret", body);
        assert!(!verify_signature("shhh", body, &sig));
    }

    #[test]
    fn rejects_a_malformed_signature_header() {
        assert!(!verify_signature("shhh", b"payload", "not-a-real-signature"));
    }
}
