use sqlx::{postgres::PgRow, Executor, Postgres, Row};

#[derive(Debug, Clone)]
pub struct Policy {
    pub id: i64,
    pub policy_key: String,
    pub description: String,
    pub action_spec: serde_json::Value,
}

fn map_row(row: &PgRow) -> Policy {
    Policy {
        id: row.get("id"),
        policy_key: row.get("policy_key"),
        description: row.get("description"),
        action_spec: row.get("action_spec"),
    }
}

/// Upserts a policy row for `policy_key`, mirroring the scan's config into
/// the store for audit (spec §4.5 step 4, invariant I4).
pub async fn upsert<'c, E>(
    executor: E,
    policy_key: &str,
    description: &str,
    action_spec: &[String],
) -> Result<Policy, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let action_spec_json = serde_json::to_value(action_spec).unwrap_or_else(|_| serde_json::json!([]));
    let row = sqlx::query(
        r#"
        INSERT INTO policies (policy_key, description, action_spec)
        VALUES ($1, $2, $3)
        ON CONFLICT (policy_key) DO UPDATE SET description = EXCLUDED.description, action_spec = EXCLUDED.action_spec
        RETURNING id, policy_key, description, action_spec
        "#,
    )
    .bind(policy_key)
    .bind(description)
    .bind(action_spec_json)
    .fetch_one(executor)
    .await?;
    Ok(map_row(&row))
}

pub async fn get_by_key<'c, E>(executor: E, policy_key: &str) -> Result<Option<Policy>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        "SELECT id, policy_key, description, action_spec FROM policies WHERE policy_key = $1",
    )
    .bind(policy_key)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(|r| map_row(&r)))
}

pub async fn list_all<'c, E>(executor: E) -> Result<Vec<Policy>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let rows = sqlx::query("SELECT id, policy_key, description, action_spec FROM policies")
        .fetch_all(executor)
        .await?;
    Ok(rows.iter().map(map_row).collect())
}
