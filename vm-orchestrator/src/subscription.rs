//! Subscriptions bind a tenant to a rate plan, directly or through a parent
//! account whose quota pool it shares.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;
use utoipa::ToSchema;

use crate::db::from_unix;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct Subscription {
    pub tenant_id: String,
    pub plan_name: Option<String>,
    pub active: bool,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// Set when this tenant draws on another tenant's pool.
    pub parent_id: Option<String>,
    /// Whether this tenant may manage children.
    pub is_parent: bool,
}

impl Subscription {
    /// Active flag set and, if an end date exists, not yet reached.
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.active && self.end_date.map_or(true, |end| now < end)
    }
}

#[derive(sqlx::FromRow)]
struct SubscriptionRow {
    tenant_id: String,
    plan_name: Option<String>,
    active: bool,
    start_date: Option<i64>,
    end_date: Option<i64>,
    parent_id: Option<String>,
    is_parent: bool,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            plan_name: row.plan_name,
            active: row.active,
            start_date: row.start_date.map(from_unix),
            end_date: row.end_date.map(from_unix),
            parent_id: row.parent_id,
            is_parent: row.is_parent,
        }
    }
}

pub async fn get_subscription(
    executor: impl SqliteExecutor<'_>,
    tenant_id: &str,
) -> Result<Option<Subscription>> {
    let row = sqlx::query_as::<_, SubscriptionRow>(
        "SELECT * FROM subscriptions WHERE tenant_id = ?",
    )
    .bind(tenant_id)
    .fetch_optional(executor)
    .await?;
    Ok(row.map(Subscription::from))
}

/// Bind `tenant_id` to `plan_name` as its own parent account, detaching it
/// from any pool it was delegated to.
pub async fn activate_plan(
    executor: impl SqliteExecutor<'_>,
    tenant_id: &str,
    plan_name: &str,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO subscriptions (tenant_id, plan_name, active, start_date, end_date, parent_id, is_parent)
         VALUES (?, ?, 1, ?, ?, NULL, 1)
         ON CONFLICT(tenant_id) DO UPDATE SET
             plan_name = excluded.plan_name,
             active = 1,
             start_date = excluded.start_date,
             end_date = excluded.end_date,
             parent_id = NULL,
             is_parent = 1",
    )
    .bind(tenant_id)
    .bind(plan_name)
    .bind(start.timestamp())
    .bind(end.timestamp())
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn deactivate(
    executor: impl SqliteExecutor<'_>,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let result =
        sqlx::query("UPDATE subscriptions SET active = 0, end_date = ? WHERE tenant_id = ?")
            .bind(now.timestamp())
            .bind(tenant_id)
            .execute(executor)
            .await?;

    if result.rows_affected() == 0 {
        return Err(OrchestratorError::NotFound(format!(
            "subscription for tenant {}",
            tenant_id
        )));
    }
    Ok(())
}

/// Turn an existing subscription back on, open-ended from `now`.
pub async fn reactivate(
    executor: impl SqliteExecutor<'_>,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE subscriptions SET active = 1, start_date = ?, end_date = NULL WHERE tenant_id = ?",
    )
    .bind(now.timestamp())
    .bind(tenant_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(OrchestratorError::NotFound(format!(
            "subscription for tenant {}",
            tenant_id
        )));
    }
    Ok(())
}

/// Rebind the plan of a tenant's own (non-delegated) subscription.
pub async fn set_plan(
    executor: impl SqliteExecutor<'_>,
    tenant_id: &str,
    plan_name: &str,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE subscriptions SET plan_name = ? WHERE tenant_id = ? AND parent_id IS NULL",
    )
    .bind(plan_name)
    .bind(tenant_id)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(OrchestratorError::InvalidState(format!(
            "tenant {} has no subscription of its own",
            tenant_id
        )));
    }
    Ok(())
}

/// Attach `child_id` to `parent_id`'s pool, creating its subscription if
/// missing. The child's own plan binding is dropped.
pub async fn link_child(
    executor: impl SqliteExecutor<'_>,
    parent_id: &str,
    child_id: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO subscriptions (tenant_id, plan_name, active, start_date, end_date, parent_id, is_parent)
         VALUES (?, NULL, 1, ?, NULL, ?, 0)
         ON CONFLICT(tenant_id) DO UPDATE SET
             plan_name = NULL,
             active = 1,
             start_date = excluded.start_date,
             end_date = NULL,
             parent_id = excluded.parent_id,
             is_parent = 0",
    )
    .bind(child_id)
    .bind(now.timestamp())
    .bind(parent_id)
    .execute(executor)
    .await?;
    Ok(())
}

/// Delete the child's subscription, but only if it belongs to `parent_id`.
pub async fn unlink_child(
    executor: impl SqliteExecutor<'_>,
    parent_id: &str,
    child_id: &str,
) -> Result<()> {
    let result = sqlx::query("DELETE FROM subscriptions WHERE tenant_id = ? AND parent_id = ?")
        .bind(child_id)
        .bind(parent_id)
        .execute(executor)
        .await?;

    if result.rows_affected() == 0 {
        return Err(OrchestratorError::NotFound(format!(
            "tenant {} is not managed by {}",
            child_id, parent_id
        )));
    }
    Ok(())
}

pub async fn count_children(executor: impl SqliteExecutor<'_>, parent_id: &str) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM subscriptions WHERE parent_id = ?",
    )
    .bind(parent_id)
    .fetch_one(executor)
    .await?;
    Ok(count)
}
