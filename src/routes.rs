use std::sync::Arc;

use axum::{
    async_trait,
    extract::{Extension, FromRequestParts},
    http::request::Parts,
    routing::post,
    Json, Router,
};
use serde::Serialize;
use sqlx::{PgPool, Row};

use crate::authorizer::Authorizer;
use crate::error::{AppError, AppResult};
use crate::webhooks::github_webhook;

/// A caller authenticated against the Platform and confirmed to belong to
/// the configured authorized team. Callers present their own platform
/// access token plus the username it belongs to; the Authorizer (C9) does
/// the team-membership check.
pub struct AuthorizedCaller {
    pub username: String,
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthorizedCaller
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Extension(authorizer) =
            Extension::<Arc<Authorizer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| AppError::Internal("authorizer not configured".into()))?;

        let username = parts
            .headers
            .get("x-policy-bot-user")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::Unauthorized)?
            .to_string();
        let token = parts
            .headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(AppError::Unauthorized)?;

        if authorizer.is_authorized(&username, token).await {
            Ok(AuthorizedCaller { username })
        } else {
            Err(AppError::Forbidden)
        }
    }
}

#[derive(Debug, Serialize)]
pub struct QueuedJobSummary {
    id: i64,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    run_at: chrono::DateTime<chrono::Utc>,
}

/// Minimal queue-introspection endpoint: lists jobs not yet completed, newest
/// first, for operators checking on stuck or dead-lettered work.
pub async fn queue_status(
    Extension(pool): Extension<PgPool>,
    _caller: AuthorizedCaller,
) -> AppResult<Json<Vec<QueuedJobSummary>>> {
    let rows = sqlx::query(
        "SELECT id, status, attempts, last_error, run_at FROM job_queue ORDER BY id DESC LIMIT 200",
    )
    .fetch_all(&pool)
    .await?;

    Ok(Json(
        rows.iter()
            .map(|row| QueuedJobSummary {
                id: row.get("id"),
                status: row.get("status"),
                attempts: row.get("attempts"),
                last_error: row.get("last_error"),
                run_at: row.get("run_at"),
            })
            .collect(),
    ))
}

pub fn api_routes() -> Router {
    Router::new()
        .route("/api/webhooks/github", post(github_webhook))
        .route("/api/queue", axum::routing::get(queue_status))
}
