//! Entitlement engine: resolves which quota pool a tenant draws on and
//! whether that pool has room for one more VM or backup.
//!
//! A delegated tenant is measured against its parent's plan, with usage
//! summed across the parent and every child linked to it. Admission is
//! strict less-than: a pool at `usage == limit` is full.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::{SqliteConnection, SqliteExecutor};
use utoipa::ToSchema;

use crate::error::{EntitlementReason, OrchestratorError, QuotaResource, Result};
use crate::plan::{get_plan, RatePlan};
use crate::subscription::{get_subscription, Subscription};

/// VMs owned by the pool owner or any of its children. Binds the owner twice.
pub(crate) const VM_POOL_USAGE: &str = "SELECT COUNT(*) FROM virtual_machines
     WHERE owner_id = ? OR owner_id IN (SELECT tenant_id FROM subscriptions WHERE parent_id = ?)";

/// Backups charged to the pool owner or any of its children. Binds the owner twice.
pub(crate) const BACKUP_POOL_USAGE: &str = "SELECT COUNT(*) FROM backups
     WHERE tenant_id = ? OR tenant_id IN (SELECT tenant_id FROM subscriptions WHERE parent_id = ?)";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct PlanLimit {
    pub max_vms: i64,
    pub max_backups: i64,
}

/// The single plan and owner a quota check resolves to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotaPool {
    pub owner_id: String,
    pub plan: RatePlan,
}

impl QuotaPool {
    pub fn limit(&self, resource: QuotaResource) -> i64 {
        match resource {
            QuotaResource::Vms => self.plan.max_vms,
            QuotaResource::Backups => self.plan.max_backups,
        }
    }

    pub fn limits(&self) -> PlanLimit {
        PlanLimit {
            max_vms: self.plan.max_vms,
            max_backups: self.plan.max_backups,
        }
    }
}

/// A passed admission check.
#[derive(Debug, Clone)]
pub struct Admission {
    pub pool: QuotaPool,
    pub resource: QuotaResource,
    pub usage: i64,
}

impl Admission {
    pub fn limit(&self) -> i64 {
        self.pool.limit(self.resource)
    }
}

fn require_active(
    subscription: Option<Subscription>,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> Result<Subscription> {
    let subscription = subscription.ok_or_else(|| OrchestratorError::NoEntitlement {
        tenant_id: tenant_id.to_string(),
        reason: EntitlementReason::NoSubscription,
    })?;
    if !subscription.is_active_at(now) {
        return Err(OrchestratorError::NoEntitlement {
            tenant_id: tenant_id.to_string(),
            reason: EntitlementReason::Inactive,
        });
    }
    Ok(subscription)
}

/// Resolve the effective pool for `tenant_id`: the parent's when delegated,
/// otherwise its own. Both the tenant's and the parent's subscription must
/// be active.
pub async fn resolve_pool(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> Result<QuotaPool> {
    let own = require_active(get_subscription(&mut *conn, tenant_id).await?, tenant_id, now)?;

    let effective = match &own.parent_id {
        Some(parent_id) => {
            require_active(get_subscription(&mut *conn, parent_id).await?, tenant_id, now)?
        }
        None => own,
    };

    let plan_name = effective
        .plan_name
        .as_deref()
        .ok_or_else(|| OrchestratorError::NoEntitlement {
            tenant_id: tenant_id.to_string(),
            reason: EntitlementReason::NoPlan,
        })?;

    let plan = match get_plan(&mut *conn, plan_name).await {
        Ok(plan) => plan,
        Err(OrchestratorError::NotFound(_)) => {
            return Err(OrchestratorError::NoEntitlement {
                tenant_id: tenant_id.to_string(),
                reason: EntitlementReason::NoPlan,
            })
        }
        Err(e) => return Err(e),
    };

    Ok(QuotaPool {
        owner_id: effective.tenant_id,
        plan,
    })
}

pub async fn pool_usage(
    executor: impl SqliteExecutor<'_>,
    owner_id: &str,
    resource: QuotaResource,
) -> Result<i64> {
    let sql = match resource {
        QuotaResource::Vms => VM_POOL_USAGE,
        QuotaResource::Backups => BACKUP_POOL_USAGE,
    };
    let usage = sqlx::query_scalar::<_, i64>(sql)
        .bind(owner_id)
        .bind(owner_id)
        .fetch_one(executor)
        .await?;
    Ok(usage)
}

/// Admit one more `resource` for `tenant_id`, or explain why not.
pub async fn admit(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    resource: QuotaResource,
    now: DateTime<Utc>,
) -> Result<Admission> {
    let pool = resolve_pool(&mut *conn, tenant_id, now).await?;
    let usage = pool_usage(&mut *conn, &pool.owner_id, resource).await?;
    let limit = pool.limit(resource);

    if usage >= limit {
        tracing::info!(
            tenant_id,
            pool_owner = %pool.owner_id,
            %resource,
            usage,
            limit,
            "admission denied"
        );
        return Err(OrchestratorError::QuotaExceeded {
            resource,
            usage,
            limit,
        });
    }

    Ok(Admission {
        pool,
        resource,
        usage,
    })
}

async fn can_create(
    conn: &mut SqliteConnection,
    tenant_id: &str,
    resource: QuotaResource,
) -> Result<bool> {
    match admit(conn, tenant_id, resource, Utc::now()).await {
        Ok(_) => Ok(true),
        Err(e) if e.is_denial() => Ok(false),
        Err(e) => Err(e),
    }
}

pub async fn can_create_vm(conn: &mut SqliteConnection, tenant_id: &str) -> Result<bool> {
    can_create(conn, tenant_id, QuotaResource::Vms).await
}

pub async fn can_create_backup(conn: &mut SqliteConnection, tenant_id: &str) -> Result<bool> {
    can_create(conn, tenant_id, QuotaResource::Backups).await
}

pub async fn effective_plan_limit(
    conn: &mut SqliteConnection,
    tenant_id: &str,
) -> Result<PlanLimit> {
    Ok(resolve_pool(conn, tenant_id, Utc::now()).await?.limits())
}
