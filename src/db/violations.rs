use sqlx::{postgres::PgRow, Executor, Postgres, Row};

#[derive(Debug, Clone)]
pub struct PolicyViolation {
    pub id: i64,
    pub scan_id: i64,
    pub repository_id: i64,
    pub policy_id: i64,
}

/// A violation joined with its repository full name and the policy's key
/// and action spec, the shape the Action Executor (C6) consumes.
#[derive(Debug, Clone)]
pub struct ViolationWithContext {
    pub violation_id: i64,
    pub repository_id: i64,
    pub repository_name: String,
    pub policy_id: i64,
    pub policy_key: String,
    pub policy_description: String,
}

fn map_row(row: &PgRow) -> PolicyViolation {
    PolicyViolation {
        id: row.get("id"),
        scan_id: row.get("scan_id"),
        repository_id: row.get("repository_id"),
        policy_id: row.get("policy_id"),
    }
}

/// Inserts a violation for `(scan_id, repository_id, policy_id)`. A
/// concurrent duplicate (invariant I2) is surfaced as a Postgres unique
/// violation and swallowed by the caller as `DuplicateViolation` (spec §7).
pub async fn insert<'c, E>(
    executor: E,
    scan_id: i64,
    repository_id: i64,
    policy_id: i64,
) -> Result<PolicyViolation, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        INSERT INTO policy_violations (scan_id, repository_id, policy_id)
        VALUES ($1, $2, $3)
        RETURNING id, scan_id, repository_id, policy_id
        "#,
    )
    .bind(scan_id)
    .bind(repository_id)
    .bind(policy_id)
    .fetch_one(executor)
    .await?;
    Ok(map_row(&row))
}

pub fn is_unique_violation(error: &sqlx::Error) -> bool {
    matches!(error, sqlx::Error::Database(db_err) if db_err.code().as_deref() == Some("23505"))
}

pub async fn list_for_scan<'c, E>(
    executor: E,
    scan_id: i64,
) -> Result<Vec<ViolationWithContext>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query(
        r#"
        SELECT
            v.id AS violation_id,
            r.id AS repository_id,
            r.name AS repository_name,
            p.id AS policy_id,
            p.policy_key AS policy_key,
            p.description AS policy_description
        FROM policy_violations v
        JOIN repositories r ON r.id = v.repository_id
        JOIN policies p ON p.id = v.policy_id
        WHERE v.scan_id = $1
        "#,
    )
    .bind(scan_id)
    .fetch_all(executor)
    .await?;
    Ok(rows
        .iter()
        .map(|row| ViolationWithContext {
            violation_id: row.get("violation_id"),
            repository_id: row.get("repository_id"),
            repository_name: row.get("repository_name"),
            policy_id: row.get("policy_id"),
            policy_key: row.get("policy_key"),
            policy_description: row.get("policy_description"),
        })
        .collect())
}
