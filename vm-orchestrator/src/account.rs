//! Read-side queries and account management: plans, checkout, delegation,
//! payments and VM inspection.

use chrono::{Duration, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{info, instrument};
use utoipa::ToSchema;
use vm_core::{Actor, Role};

use crate::audit::{self, AuditEntry, AuditFilter};
use crate::backup::{self, Backup};
use crate::entitlement::{pool_usage, resolve_pool};
use crate::error::{EntitlementReason, OrchestratorError, QuotaResource, Result};
use crate::orchestrator::VmOrchestrator;
use crate::payment::{self, Payment};
use crate::plan::{self, RatePlan};
use crate::subscription::{self, Subscription};
use crate::tenant::{self, Tenant, TenantReport};
use crate::vm::{self, VirtualMachine};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct QuotaReport {
    /// Tenant whose plan and pool apply (the parent when delegated).
    pub pool_owner: String,
    pub plan: String,
    pub vms_used: i64,
    pub max_vms: i64,
    pub backups_used: i64,
    pub max_backups: i64,
    pub good_standing: bool,
}

impl VmOrchestrator {
    // Plans

    pub async fn seed_default_plans(&self) -> Result<usize> {
        plan::seed_default_plans(self.pool()).await
    }

    pub async fn list_plans(&self) -> Result<Vec<RatePlan>> {
        plan::list_plans(self.pool()).await
    }

    // Tenants

    pub async fn create_tenant(&self, username: &str, email: &str, role: Role) -> Result<Tenant> {
        tenant::create_tenant(self.pool(), username, email, role).await
    }

    pub async fn get_tenant(&self, id: &str) -> Result<Tenant> {
        tenant::get_tenant(self.pool(), id).await
    }

    pub async fn find_tenant_by_username(&self, username: &str) -> Result<Option<Tenant>> {
        tenant::find_tenant_by_username(self.pool(), username).await
    }

    // Checkout

    /// Pay for `plan_name` and activate it for one subscription period.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub async fn subscribe(&self, actor: &Actor, plan_name: &str) -> Result<Subscription> {
        Self::require_operator(actor)?;
        let plan = plan::get_plan(self.pool(), plan_name).await?;

        let now = Utc::now();
        let end = now + Duration::days(self.settings().pricing.subscription_period_days);
        let charge = Payment::completed(
            &actor.tenant_id,
            plan.price_cents,
            format!("{} plan subscription", plan.name),
            now,
        );

        let mut tx = self.pool().begin().await?;
        payment::insert_payment(&mut *tx, &charge).await?;
        subscription::activate_plan(&mut *tx, &actor.tenant_id, &plan.name, now, end).await?;
        let active = subscription::get_subscription(&mut *tx, &actor.tenant_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::InvalidState("subscription vanished after activation".into())
            })?;
        tx.commit().await?;

        info!(plan = %plan.name, "subscription activated");
        Ok(active)
    }

    pub async fn subscription(&self, actor: &Actor) -> Result<Option<Subscription>> {
        subscription::get_subscription(self.pool(), &actor.tenant_id).await
    }

    #[instrument(skip(self, actor), fields(admin = %actor.tenant_id))]
    pub async fn deactivate_subscription(&self, actor: &Actor, tenant_id: &str) -> Result<()> {
        Self::require_admin(actor)?;
        subscription::deactivate(self.pool(), tenant_id, Utc::now()).await?;
        info!(tenant_id, "subscription deactivated");
        Ok(())
    }

    /// Turn a tenant's subscription back on, open-ended from now.
    #[instrument(skip(self, actor), fields(admin = %actor.tenant_id))]
    pub async fn activate_subscription(
        &self,
        actor: &Actor,
        tenant_id: &str,
    ) -> Result<Subscription> {
        Self::require_admin(actor)?;
        let mut tx = self.pool().begin().await?;
        subscription::reactivate(&mut *tx, tenant_id, Utc::now()).await?;
        let active = subscription::get_subscription(&mut *tx, tenant_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::NotFound(format!("subscription for tenant {}", tenant_id))
            })?;
        tx.commit().await?;
        info!(tenant_id, "subscription activated by administrator");
        Ok(active)
    }

    /// Switch the actor's own subscription to another plan. No checkout and
    /// no change to the subscription period.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub async fn change_plan(&self, actor: &Actor, plan_name: &str) -> Result<Subscription> {
        Self::require_operator(actor)?;
        let plan = plan::get_plan(self.pool(), plan_name).await?;

        let mut tx = self.pool().begin().await?;
        let current = subscription::get_subscription(&mut *tx, &actor.tenant_id)
            .await?
            .ok_or_else(|| OrchestratorError::NoEntitlement {
                tenant_id: actor.tenant_id.clone(),
                reason: EntitlementReason::NoSubscription,
            })?;
        if current.parent_id.is_some() {
            return Err(OrchestratorError::InvalidState(
                "delegated tenants draw on their parent's plan".to_string(),
            ));
        }
        subscription::set_plan(&mut *tx, &actor.tenant_id, &plan.name).await?;
        let changed = subscription::get_subscription(&mut *tx, &actor.tenant_id)
            .await?
            .ok_or_else(|| {
                OrchestratorError::InvalidState("subscription vanished after plan change".into())
            })?;
        tx.commit().await?;

        info!(plan = %plan.name, "rate plan changed");
        Ok(changed)
    }

    // Delegation

    /// Put `child_username` into the actor's quota pool. A tenant has at
    /// most one parent, and pools do not nest.
    #[instrument(skip(self, actor), fields(parent = %actor.tenant_id))]
    pub async fn add_managed_tenant(&self, actor: &Actor, child_username: &str) -> Result<Tenant> {
        Self::require_operator(actor)?;

        let mut tx = self.pool().begin().await?;

        let parent = subscription::get_subscription(&mut *tx, &actor.tenant_id).await?;
        if !parent.as_ref().is_some_and(|s| s.is_parent && s.parent_id.is_none()) {
            return Err(OrchestratorError::Forbidden(
                "only parent accounts can manage other tenants".to_string(),
            ));
        }

        let child = tenant::find_tenant_by_username(&mut *tx, child_username)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("tenant '{}'", child_username)))?;
        if child.id == actor.tenant_id {
            return Err(OrchestratorError::InvalidInput(
                "a tenant cannot manage itself".to_string(),
            ));
        }

        if let Some(existing) = subscription::get_subscription(&mut *tx, &child.id).await? {
            match existing.parent_id.as_deref() {
                Some(parent_id) if parent_id == actor.tenant_id => {
                    return Ok(child);
                }
                Some(_) => {
                    return Err(OrchestratorError::Conflict(format!(
                        "tenant '{}' is already managed by another account",
                        child.username
                    )))
                }
                None => {}
            }
        }
        if subscription::count_children(&mut *tx, &child.id).await? > 0 {
            return Err(OrchestratorError::Conflict(format!(
                "tenant '{}' manages tenants of its own",
                child.username
            )));
        }

        subscription::link_child(&mut *tx, &actor.tenant_id, &child.id, Utc::now()).await?;
        tx.commit().await?;

        info!(child = %child.username, "managed tenant added");
        Ok(child)
    }

    #[instrument(skip(self, actor), fields(parent = %actor.tenant_id))]
    pub async fn remove_managed_tenant(&self, actor: &Actor, child_id: &str) -> Result<()> {
        Self::require_operator(actor)?;
        subscription::unlink_child(self.pool(), &actor.tenant_id, child_id).await?;
        info!(child_id, "managed tenant removed");
        Ok(())
    }

    pub async fn list_managed_tenants(&self, actor: &Actor) -> Result<Vec<Tenant>> {
        tenant::list_managed(self.pool(), &actor.tenant_id).await
    }

    // Payments

    pub async fn list_payments(&self, actor: &Actor) -> Result<Vec<Payment>> {
        payment::list_payments(self.pool(), Some(&actor.tenant_id)).await
    }

    pub async fn list_all_payments(&self, actor: &Actor) -> Result<Vec<Payment>> {
        Self::require_admin(actor)?;
        payment::list_payments(self.pool(), None).await
    }

    /// Settle a pending payment. Owners settle their own; administrators any.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub async fn complete_payment(&self, actor: &Actor, payment_id: &str) -> Result<Payment> {
        Self::require_operator(actor)?;

        let mut conn = self.pool().acquire().await?;
        let existing = payment::get_payment(&mut *conn, payment_id).await?;
        if !actor.can_act_on(&existing.tenant_id) {
            return Err(OrchestratorError::Forbidden(format!(
                "payment {} belongs to another tenant",
                payment_id
            )));
        }
        let completed = payment::mark_completed(&mut conn, payment_id, Utc::now()).await?;

        info!(payment_id, amount_cents = completed.amount_cents, "payment completed");
        Ok(completed)
    }

    pub async fn is_in_good_standing(&self, tenant_id: &str) -> Result<bool> {
        payment::is_in_good_standing_at(self.pool(), tenant_id, Utc::now()).await
    }

    // Inspection

    /// The actor's VMs; every VM for an administrator.
    pub async fn list_vms(&self, actor: &Actor) -> Result<Vec<VirtualMachine>> {
        let owner = (!actor.is_admin()).then_some(actor.tenant_id.as_str());
        vm::list_vms(self.pool(), owner).await
    }

    pub async fn get_vm(&self, actor: &Actor, vm_id: &str) -> Result<VirtualMachine> {
        self.owned_vm(actor, vm_id).await
    }

    /// Human-readable `showvminfo`, key by key.
    pub async fn vm_details(&self, actor: &Actor, vm_id: &str) -> Result<IndexMap<String, String>> {
        let vm = self.owned_vm(actor, vm_id).await?;
        Ok(self.hypervisor().details(&vm.name).await?)
    }

    /// Power state as the hypervisor reports it (`running`, `poweroff`, ...).
    pub async fn vm_state(&self, actor: &Actor, vm_id: &str) -> Result<String> {
        let vm = self.owned_vm(actor, vm_id).await?;
        let state = self.hypervisor().power_state(&vm.name).await?;
        Ok(state.as_str().to_string())
    }

    pub async fn list_snapshots(&self, actor: &Actor, vm_id: &str) -> Result<Vec<String>> {
        let vm = self.owned_vm(actor, vm_id).await?;
        Ok(self.hypervisor().list_snapshots(&vm.name).await?)
    }

    pub async fn list_backups(&self, actor: &Actor, vm_id: &str) -> Result<Vec<Backup>> {
        let vm = self.owned_vm(actor, vm_id).await?;
        backup::list_for_vm(self.pool(), &vm.id).await
    }

    /// Usage and limits of the pool the actor draws on.
    pub async fn quota(&self, actor: &Actor) -> Result<QuotaReport> {
        let pool = {
            let mut conn = self.pool().acquire().await?;
            resolve_pool(&mut conn, &actor.tenant_id, Utc::now()).await?
        };
        let vms_used = pool_usage(self.pool(), &pool.owner_id, QuotaResource::Vms).await?;
        let backups_used = pool_usage(self.pool(), &pool.owner_id, QuotaResource::Backups).await?;
        let good_standing = self.is_in_good_standing(&actor.tenant_id).await?;

        Ok(QuotaReport {
            pool_owner: pool.owner_id,
            plan: pool.plan.name,
            vms_used,
            max_vms: pool.plan.max_vms,
            backups_used,
            max_backups: pool.plan.max_backups,
            good_standing,
        })
    }

    /// Every tenant with role, overdue flag and subscription state.
    pub async fn tenant_reports(&self, actor: &Actor) -> Result<Vec<TenantReport>> {
        Self::require_admin(actor)?;
        tenant::tenant_reports(self.pool(), None, Utc::now()).await
    }

    pub async fn tenant_report(&self, actor: &Actor, tenant_id: &str) -> Result<TenantReport> {
        Self::require_admin(actor)?;
        tenant::tenant_reports(self.pool(), Some(tenant_id), Utc::now())
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| OrchestratorError::NotFound(format!("tenant {}", tenant_id)))
    }

    /// Audit trail, newest first. Administrators only.
    pub async fn audit_log(&self, actor: &Actor, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
        Self::require_admin(actor)?;
        audit::list(self.pool(), filter).await
    }
}
