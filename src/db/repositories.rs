use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, Executor, Postgres, Row};

#[derive(Debug, Clone)]
pub struct Repository {
    pub id: i64,
    pub platform_repository_id: i64,
    pub name: String,
    pub compliance_status: String,
    pub last_scanned_at: Option<DateTime<Utc>>,
}

fn map_row(row: &PgRow) -> Repository {
    Repository {
        id: row.get("id"),
        platform_repository_id: row.get("platform_repository_id"),
        name: row.get("name"),
        compliance_status: row.get("compliance_status"),
        last_scanned_at: row.get("last_scanned_at"),
    }
}

pub async fn list_all<'c, E>(executor: E) -> Result<Vec<Repository>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT id, platform_repository_id, name, compliance_status, last_scanned_at FROM repositories",
    )
    .fetch_all(executor)
    .await?;
    Ok(rows.iter().map(map_row).collect())
}

pub async fn get_by_platform_id<'c, E>(
    executor: E,
    platform_repository_id: i64,
) -> Result<Option<Repository>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "SELECT id, platform_repository_id, name, compliance_status, last_scanned_at \
         FROM repositories WHERE platform_repository_id = $1",
    )
    .bind(platform_repository_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| map_row(&r)))
}

/// Inserts the repository if unknown, or updates its name if the platform
/// reports a new full name for the same `platform_repository_id` (spec §4.5
/// step 5, §8 rename boundary behavior).
pub async fn upsert<'c, E>(
    executor: E,
    platform_repository_id: i64,
    name: &str,
) -> Result<Repository, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO repositories (platform_repository_id, name)
        VALUES ($1, $2)
        ON CONFLICT (platform_repository_id) DO UPDATE SET name = EXCLUDED.name
        RETURNING id, platform_repository_id, name, compliance_status, last_scanned_at
        "#,
    )
    .bind(platform_repository_id)
    .bind(name)
    .fetch_one(executor)
    .await?;
    Ok(map_row(&row))
}

/// Deletes every stored repository whose `platform_repository_id` is not in
/// `live_ids`, cascading its violations and action logs.
pub async fn delete_missing<'c, E>(executor: E, live_ids: &[i64]) -> Result<u64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        "DELETE FROM repositories WHERE NOT (platform_repository_id = ANY($1))",
    )
    .bind(live_ids)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

pub async fn mark_scanned<'c, E>(
    executor: E,
    repository_id: i64,
    compliance_status: &str,
) -> Result<(), sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query(
        "UPDATE repositories SET compliance_status = $2, last_scanned_at = NOW() WHERE id = $1",
    )
    .bind(repository_id)
    .bind(compliance_status)
    .execute(executor)
    .await?;
    Ok(())
}
