use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Executor, Postgres, Row};

#[derive(Debug, Clone, PartialEq, Eq, sqlx::Type)]
#[sqlx(type_name = "scan_status", rename_all = "snake_case")]
pub enum ScanStatus {
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone)]
pub struct Scan {
    pub id: i64,
    pub status: ScanStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_details: Option<String>,
}

fn map_row(row: &PgRow) -> Scan {
    Scan {
        id: row.get("id"),
        status: row.get("status"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        failure_details: row.get("failure_details"),
    }
}

pub async fn start<'c, E>(executor: E) -> Result<Scan, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO scans (status, started_at)
        VALUES ('in_progress', NOW())
        RETURNING id, status, started_at, completed_at, failure_details
        "#,
    )
    .fetch_one(executor)
    .await?;
    Ok(map_row(&row))
}

pub async fn mark_completed<'c, E>(executor: E, scan_id: i64) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "UPDATE scans SET status = 'completed', completed_at = NOW() WHERE id = $1",
    )
    .bind(scan_id)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn mark_failed<'c, E>(
    executor: E,
    scan_id: i64,
    details: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "UPDATE scans SET status = 'failed', completed_at = NOW(), failure_details = $2 WHERE id = $1",
    )
    .bind(scan_id)
    .bind(details)
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get<'c, E>(executor: E, scan_id: i64) -> Result<Option<Scan>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "SELECT id, status, started_at, completed_at, failure_details FROM scans WHERE id = $1",
    )
    .bind(scan_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| map_row(&r)))
}
