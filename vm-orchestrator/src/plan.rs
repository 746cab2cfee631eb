//! Rate plan catalogue.

use serde::{Deserialize, Serialize};
use sqlx::{SqliteExecutor, SqlitePool};
use tracing::instrument;
use utoipa::ToSchema;

use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::FromRow)]
pub struct RatePlan {
    pub name: String,
    pub max_vms: i64,
    pub max_backups: i64,
    pub price_cents: i64,
}

impl RatePlan {
    fn new(name: &str, max_vms: i64, max_backups: i64, price_cents: i64) -> Self {
        Self {
            name: name.to_string(),
            max_vms,
            max_backups,
            price_cents,
        }
    }
}

/// bronze, silver, gold and platinum.
pub fn default_plans() -> Vec<RatePlan> {
    vec![
        RatePlan::new("bronze", 1, 1, 10_000),
        RatePlan::new("silver", 2, 2, 20_000),
        RatePlan::new("gold", 4, 4, 40_000),
        RatePlan::new("platinum", 8, 8, 80_000),
    ]
}

pub async fn insert_plan(executor: impl SqliteExecutor<'_>, plan: &RatePlan) -> Result<bool> {
    let result = sqlx::query(
        "INSERT INTO rate_plans (name, max_vms, max_backups, price_cents)
         VALUES (?, ?, ?, ?)
         ON CONFLICT(name) DO NOTHING",
    )
    .bind(&plan.name)
    .bind(plan.max_vms)
    .bind(plan.max_backups)
    .bind(plan.price_cents)
    .execute(executor)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// Insert the default catalogue; existing plans are left untouched.
/// Returns how many plans were added.
#[instrument(skip(pool))]
pub async fn seed_default_plans(pool: &SqlitePool) -> Result<usize> {
    let mut tx = pool.begin().await?;
    let mut added = 0;
    for plan in default_plans() {
        if insert_plan(&mut *tx, &plan).await? {
            added += 1;
        }
    }
    tx.commit().await?;

    tracing::info!(added, "rate plans seeded");
    Ok(added)
}

pub async fn list_plans(executor: impl SqliteExecutor<'_>) -> Result<Vec<RatePlan>> {
    let plans = sqlx::query_as::<_, RatePlan>(
        "SELECT * FROM rate_plans ORDER BY price_cents ASC, name ASC",
    )
    .fetch_all(executor)
    .await?;
    Ok(plans)
}

pub async fn get_plan(executor: impl SqliteExecutor<'_>, name: &str) -> Result<RatePlan> {
    sqlx::query_as::<_, RatePlan>("SELECT * FROM rate_plans WHERE name = ?")
        .bind(name)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("rate plan '{}'", name)))
}
