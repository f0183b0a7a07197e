use chrono::{DateTime, Utc};
use sqlx::{Executor, Postgres};

#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "action_log_status", rename_all = "snake_case")]
pub enum ActionLogStatus {
    Success,
    Failed,
    Skipped,
}

pub async fn record<'c, E>(
    executor: E,
    repository_id: i64,
    policy_id: i64,
    action_type: &str,
    status: ActionLogStatus,
    details: Option<&str>,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        r#"
        INSERT INTO action_logs (repository_id, policy_id, action_type, status, timestamp, details)
        VALUES ($1, $2, $3, $4, NOW(), $5)
        "#,
    )
    .bind(repository_id)
    .bind(policy_id)
    .bind(action_type)
    .bind(status)
    .bind(details)
    .execute(executor)
    .await?;
    Ok(())
}

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ActionLogEntry {
    pub id: i64,
    pub repository_id: i64,
    pub policy_id: i64,
    pub action_type: String,
    pub status: ActionLogStatus,
    pub timestamp: DateTime<Utc>,
    pub details: Option<String>,
}

pub async fn list_for_repository<'c, E>(
    executor: E,
    repository_id: i64,
) -> Result<Vec<ActionLogEntry>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, ActionLogEntry>(
        "SELECT id, repository_id, policy_id, action_type, status, timestamp, details \
         FROM action_logs WHERE repository_id = $1 ORDER BY timestamp DESC",
    )
    .bind(repository_id)
    .fetch_all(executor)
    .await
}
