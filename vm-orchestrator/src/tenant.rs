//! Tenant records mirrored from the identity layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;
use tracing::instrument;
use utoipa::ToSchema;
use uuid::Uuid;
use vm_core::validation::validate_username;
use vm_core::{Actor, Role};

use crate::db::{from_unix, is_unique_violation};
use crate::error::{OrchestratorError, Result};
use crate::payment::PaymentStatus;

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Tenant {
    pub id: String,
    pub username: String,
    pub email: String,
    #[schema(value_type = String, example = "standard")]
    pub role: Role,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn actor(&self) -> Actor {
        Actor::new(self.id.clone(), self.role)
    }
}

/// Administrative summary of one tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct TenantReport {
    pub id: String,
    pub username: String,
    pub email: String,
    #[schema(value_type = String, example = "standard")]
    pub role: Role,
    pub has_overdue_payments: bool,
    /// Subscription active and not past its end date.
    pub is_active: bool,
    pub plan: Option<String>,
}

#[derive(sqlx::FromRow)]
struct TenantReportRow {
    id: String,
    username: String,
    email: String,
    role: String,
    active: Option<bool>,
    end_date: Option<i64>,
    plan_name: Option<String>,
    overdue: i64,
}

#[derive(sqlx::FromRow)]
struct TenantRow {
    id: String,
    username: String,
    email: String,
    role: String,
    created_at: i64,
}

impl TryFrom<TenantRow> for Tenant {
    type Error = OrchestratorError;

    fn try_from(row: TenantRow) -> Result<Self> {
        let role = Role::parse(&row.role).ok_or_else(|| {
            OrchestratorError::InvalidState(format!(
                "tenant {} has unknown role '{}'",
                row.id, row.role
            ))
        })?;
        Ok(Self {
            id: row.id,
            username: row.username,
            email: row.email,
            role,
            created_at: from_unix(row.created_at),
        })
    }
}

#[instrument(skip(executor, email))]
pub async fn create_tenant(
    executor: impl SqliteExecutor<'_>,
    username: &str,
    email: &str,
    role: Role,
) -> Result<Tenant> {
    validate_username(username)?;
    if !email.contains('@') {
        return Err(OrchestratorError::InvalidInput(format!(
            "'{}' is not an email address",
            email
        )));
    }

    let tenant = Tenant {
        id: Uuid::new_v4().to_string(),
        username: username.to_string(),
        email: email.to_string(),
        role,
        created_at: Utc::now(),
    };

    sqlx::query(
        "INSERT INTO tenants (id, username, email, role, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(&tenant.id)
    .bind(&tenant.username)
    .bind(&tenant.email)
    .bind(tenant.role.as_str())
    .bind(tenant.created_at.timestamp())
    .execute(executor)
    .await
    .map_err(|e| {
        if is_unique_violation(&e) {
            OrchestratorError::Conflict(format!("username '{}' is taken", username))
        } else {
            e.into()
        }
    })?;

    tracing::info!(tenant_id = %tenant.id, username, "tenant created");
    Ok(tenant)
}

pub async fn get_tenant(executor: impl SqliteExecutor<'_>, id: &str) -> Result<Tenant> {
    sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("tenant {}", id)))?
        .try_into()
}

pub async fn find_tenant_by_username(
    executor: impl SqliteExecutor<'_>,
    username: &str,
) -> Result<Option<Tenant>> {
    sqlx::query_as::<_, TenantRow>("SELECT * FROM tenants WHERE username = ?")
        .bind(username)
        .fetch_optional(executor)
        .await?
        .map(Tenant::try_from)
        .transpose()
}

/// Tenants whose subscription points at `parent_id`.
pub async fn list_managed(
    executor: impl SqliteExecutor<'_>,
    parent_id: &str,
) -> Result<Vec<Tenant>> {
    sqlx::query_as::<_, TenantRow>(
        "SELECT t.* FROM tenants t
         JOIN subscriptions s ON s.tenant_id = t.id
         WHERE s.parent_id = ?
         ORDER BY t.username",
    )
    .bind(parent_id)
    .fetch_all(executor)
    .await?
    .into_iter()
    .map(Tenant::try_from)
    .collect()
}

/// Role, standing and subscription state for every tenant, or for one.
pub async fn tenant_reports(
    executor: impl SqliteExecutor<'_>,
    tenant_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<Vec<TenantReport>> {
    let rows = sqlx::query_as::<_, TenantReportRow>(
        "SELECT t.id, t.username, t.email, t.role, s.active, s.end_date, s.plan_name,
                (SELECT COUNT(*) FROM payments p
                 WHERE p.tenant_id = t.id AND p.status = ? AND p.due_date < ?) AS overdue
         FROM tenants t
         LEFT JOIN subscriptions s ON s.tenant_id = t.id
         WHERE (? IS NULL OR t.id = ?)
         ORDER BY t.username",
    )
    .bind(PaymentStatus::Pending)
    .bind(now.timestamp())
    .bind(tenant_id)
    .bind(tenant_id)
    .fetch_all(executor)
    .await?;

    rows.into_iter()
        .map(|row| {
            let role = Role::parse(&row.role).ok_or_else(|| {
                OrchestratorError::InvalidState(format!(
                    "tenant {} has unknown role '{}'",
                    row.id, row.role
                ))
            })?;
            let is_active = row.active.unwrap_or(false)
                && row.end_date.map_or(true, |end| now.timestamp() < end);
            Ok(TenantReport {
                id: row.id,
                username: row.username,
                email: row.email,
                role,
                has_overdue_payments: row.overdue > 0,
                is_active,
                plan: row.plan_name,
            })
        })
        .collect()
}
