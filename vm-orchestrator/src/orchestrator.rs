//! VM lifecycle orchestration.
//!
//! Every mutating operation follows the same order: authorize, take the
//! per-VM (or per-pool) lock, run the remote hypervisor commands with no
//! database connection held, then write the local change and its audit
//! entry in one transaction. When the remote side succeeded but the local
//! write did not, the operation still succeeds and carries a
//! [`ReconciliationWarning`]; when a failed operation leaves a remote change
//! behind, the warning rides on the error instead.
//!
//! Each mutating operation runs on its own task. A caller that goes away
//! mid-sequence stops waiting, but the remote steps still run to completion
//! or compensation.

use std::future::Future;
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tracing::{info, instrument, warn, Instrument};
use utoipa::ToSchema;
use uuid::Uuid;
use vm_config::ServiceConfig;
use vm_core::{Actor, Adjustment, Pricing, ResourceLimits, ResourceSpec, VmName};
use vm_provider::VirtualBox;

use crate::audit::{self, ActionKind};
use crate::backup::{self, Backup};
use crate::entitlement::{self, pool_usage, resolve_pool};
use crate::error::{OrchestratorError, Outcome, QuotaResource, ReconciliationWarning, Result};
use crate::locks::KeyedLocks;
use crate::notify::{Notification, Notifier};
use crate::payment::{self, Payment};
use crate::tenant;
use crate::vm::{self, VirtualMachine, VmStatus};

#[derive(Debug, Clone, Copy, Default)]
pub struct OrchestratorSettings {
    pub limits: ResourceLimits,
    pub pricing: Pricing,
}

impl OrchestratorSettings {
    pub fn from_config(config: &ServiceConfig) -> Self {
        Self {
            limits: config.limits,
            pricing: config.pricing,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateVmRequest {
    #[schema(example = "web01")]
    pub name: String,
    #[schema(example = 2048)]
    pub disk_size_mb: u32,
    #[schema(example = 2)]
    pub cpus: u32,
    #[schema(example = 1024)]
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConfigureVmRequest {
    pub cpus: u32,
    pub memory_mb: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TransferVmRequest {
    /// Username of the receiving tenant.
    pub new_owner: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct BackupRequest {
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct CreatedVm {
    pub vm: VirtualMachine,
    /// Requested values that were lowered to the hard ceilings.
    #[schema(value_type = Vec<Object>)]
    pub adjustments: Vec<Adjustment>,
    /// Extra-disk charge, when the disk exceeds the included allowance.
    pub payment: Option<Payment>,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ConfiguredVm {
    pub vm: VirtualMachine,
    #[schema(value_type = Vec<Object>)]
    pub adjustments: Vec<Adjustment>,
    /// The VM was running and had to be powered off first.
    pub forced_stop: bool,
}

#[derive(Clone)]
pub struct VmOrchestrator {
    pool: SqlitePool,
    hypervisor: VirtualBox,
    notifier: Arc<dyn Notifier>,
    settings: OrchestratorSettings,
    vm_locks: Arc<KeyedLocks>,
    pool_locks: Arc<KeyedLocks>,
}

impl VmOrchestrator {
    pub fn new(
        pool: SqlitePool,
        hypervisor: VirtualBox,
        notifier: Arc<dyn Notifier>,
        settings: OrchestratorSettings,
    ) -> Self {
        Self {
            pool,
            hypervisor,
            notifier,
            settings,
            vm_locks: Arc::new(KeyedLocks::new()),
            pool_locks: Arc::new(KeyedLocks::new()),
        }
    }

    /// Get a reference to the database pool
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub(crate) fn hypervisor(&self) -> &VirtualBox {
        &self.hypervisor
    }

    /// Guests may look but not act.
    pub(crate) fn require_operator(actor: &Actor) -> Result<()> {
        if !actor.can_operate() {
            return Err(OrchestratorError::Forbidden(format!(
                "role '{}' cannot perform this operation",
                actor.role.as_str()
            )));
        }
        Ok(())
    }

    pub(crate) fn require_admin(actor: &Actor) -> Result<()> {
        if !actor.is_admin() {
            return Err(OrchestratorError::Forbidden(
                "administrator role required".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a VM the actor owns, or any VM for an administrator.
    pub(crate) async fn owned_vm(&self, actor: &Actor, vm_id: &str) -> Result<VirtualMachine> {
        let vm = vm::get_vm(&self.pool, vm_id).await?;
        if !actor.can_act_on(&vm.owner_id) {
            return Err(OrchestratorError::OwnershipViolation {
                actor: actor.tenant_id.clone(),
                vm: vm.name.to_string(),
            });
        }
        Ok(vm)
    }

    /// The actor must hold an active entitlement. Administrators are exempt.
    async fn require_entitlement(&self, actor: &Actor) -> Result<()> {
        if actor.is_admin() {
            return Ok(());
        }
        let mut conn = self.pool.acquire().await?;
        resolve_pool(&mut conn, &actor.tenant_id, Utc::now()).await?;
        Ok(())
    }

    /// Run `op` on its own task and wait for it. Dropping the returned
    /// future does not cancel the task.
    async fn detached<T, F, Fut>(&self, op: F) -> Result<T>
    where
        F: FnOnce(VmOrchestrator) -> Fut,
        Fut: Future<Output = Result<T>> + Send + 'static,
        T: Send + 'static,
    {
        let task = tokio::spawn(op(self.clone()).in_current_span());
        task.await?
    }

    /// Best-effort removal of a partially provisioned VM. Returns `cause`,
    /// with a warning attached if the VM could not be removed.
    async fn compensate_create(
        &self,
        name: &VmName,
        vm_id: &str,
        cause: OrchestratorError,
    ) -> OrchestratorError {
        warn!(vm = %name, error = %cause, "create failed after registering VM, rolling back");
        match self.hypervisor.unregister_and_delete(name).await {
            Ok(()) => cause,
            Err(e) => cause.with_warning(ReconciliationWarning::new(
                "create",
                vm_id,
                name.as_str(),
                format!("rollback of remote VM failed, VM may be orphaned: {}", e),
            )),
        }
    }

    /// Provision a VM: admission, three remote steps, then one local commit.
    ///
    /// No row exists unless every remote step succeeded, and a remote VM
    /// whose local commit fails is unregistered again.
    #[instrument(skip(self, actor, req), fields(tenant = %actor.tenant_id, vm = %req.name))]
    pub async fn create_vm(
        &self,
        actor: &Actor,
        req: CreateVmRequest,
    ) -> Result<Outcome<CreatedVm>> {
        let actor = actor.clone();
        self.detached(move |this| async move { this.run_create(&actor, req).await })
            .await
    }

    async fn run_create(&self, actor: &Actor, req: CreateVmRequest) -> Result<Outcome<CreatedVm>> {
        Self::require_operator(actor)?;
        let name = VmName::parse(req.name.as_str())?;
        let (spec, adjustments) = self.settings.limits.clamp(ResourceSpec {
            disk_mb: req.disk_size_mb,
            cpus: req.cpus,
            memory_mb: req.memory_mb,
        })?;

        let pool_owner = {
            let mut conn = self.pool.acquire().await?;
            resolve_pool(&mut conn, &actor.tenant_id, Utc::now())
                .await?
                .owner_id
        };
        let _pool_guard = self.pool_locks.lock(&pool_owner).await;

        let admission = {
            let mut conn = self.pool.acquire().await?;
            let admission =
                entitlement::admit(&mut conn, &actor.tenant_id, QuotaResource::Vms, Utc::now())
                    .await?;
            if vm::name_exists(&mut *conn, &name).await? {
                return Err(OrchestratorError::Conflict(format!(
                    "VM name '{}' is taken",
                    name
                )));
            }
            admission
        };

        let vm_id = Uuid::new_v4().to_string();

        self.hypervisor.create_vm(&name).await?;
        let provisioned = async {
            self.hypervisor
                .set_initial_resources(&name, spec.memory_mb, spec.cpus)
                .await?;
            self.hypervisor.create_disk(&name, spec.disk_mb).await?;
            Ok::<(), OrchestratorError>(())
        }
        .await;
        if let Err(e) = provisioned {
            return Err(self.compensate_create(&name, &vm_id, e).await);
        }

        let now = Utc::now();
        let price_cents = self.settings.pricing.disk_price_cents(spec.disk_mb);
        let vm = VirtualMachine {
            id: vm_id,
            name,
            owner_id: actor.tenant_id.clone(),
            status: VmStatus::Stopped,
            disk_size_mb: spec.disk_mb,
            cpus: spec.cpus,
            memory_mb: spec.memory_mb,
            price_cents,
            created_at: now,
            updated_at: now,
        };
        let payment = (price_cents > 0).then(|| {
            Payment::pending(
                &actor.tenant_id,
                price_cents,
                format!("extra disk for VM {} ({} MB)", vm.name, spec.disk_mb),
                now,
                self.settings.pricing.payment_grace_days,
            )
        });

        let committed = async {
            let mut tx = self.pool.begin().await?;
            let inserted = vm::insert_if_room(
                &mut *tx,
                &vm,
                &admission.pool.owner_id,
                admission.limit(),
            )
            .await?;
            if !inserted {
                tx.rollback().await?;
                let usage =
                    pool_usage(&self.pool, &admission.pool.owner_id, QuotaResource::Vms).await?;
                return Err(OrchestratorError::QuotaExceeded {
                    resource: QuotaResource::Vms,
                    usage,
                    limit: admission.limit(),
                });
            }
            if let Some(payment) = &payment {
                payment::insert_payment(&mut *tx, payment).await?;
            }
            audit::record(
                &mut *tx,
                ActionKind::Create,
                &vm.id,
                vm.name.as_str(),
                &actor.tenant_id,
                now,
            )
            .await?;
            tx.commit().await?;
            Ok::<(), OrchestratorError>(())
        }
        .await;
        if let Err(e) = committed {
            return Err(self.compensate_create(&vm.name, &vm.id, e).await);
        }

        info!(vm_id = %vm.id, pool_owner = %admission.pool.owner_id, "VM created");
        Ok(Outcome::clean(CreatedVm {
            vm,
            adjustments,
            payment,
        }))
    }

    /// Apply a status change and its audit entry locally, after the remote
    /// side already changed.
    async fn commit_status(
        &self,
        mut vm: VirtualMachine,
        status: VmStatus,
        action: ActionKind,
        actor: &Actor,
    ) -> Outcome<VirtualMachine> {
        let now = Utc::now();
        let committed = async {
            let mut tx = self.pool.begin().await?;
            vm::set_status(&mut *tx, &vm.id, status, now).await?;
            audit::record(&mut *tx, action, &vm.id, vm.name.as_str(), &actor.tenant_id, now)
                .await?;
            tx.commit().await?;
            Ok::<(), OrchestratorError>(())
        }
        .await;

        vm.status = status;
        vm.updated_at = now;
        match committed {
            Ok(()) => Outcome::clean(vm),
            Err(e) => {
                let warning = ReconciliationWarning::new(
                    action.as_str(),
                    &vm.id,
                    vm.name.as_str(),
                    format!("hypervisor applied {} but the record was not updated: {}", action.as_str(), e),
                );
                Outcome::with_warning(vm, warning)
            }
        }
    }

    /// Power on headless. Already running is a no-op with no audit entry.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub async fn start_vm(&self, actor: &Actor, vm_id: &str) -> Result<Outcome<VirtualMachine>> {
        let (actor, vm_id) = (actor.clone(), vm_id.to_string());
        self.detached(move |this| async move { this.run_start(&actor, &vm_id).await })
            .await
    }

    async fn run_start(&self, actor: &Actor, vm_id: &str) -> Result<Outcome<VirtualMachine>> {
        Self::require_operator(actor)?;
        let _vm_guard = self.vm_locks.lock(vm_id).await;
        let vm = self.owned_vm(actor, vm_id).await?;
        self.require_entitlement(actor).await?;

        if vm.status == VmStatus::Running {
            info!(vm = %vm.name, "already running");
            return Ok(Outcome::clean(vm));
        }

        self.hypervisor.start_headless(&vm.name).await?;
        Ok(self
            .commit_status(vm, VmStatus::Running, ActionKind::Start, actor)
            .await)
    }

    /// Graceful ACPI shutdown. Already stopped is a no-op with no audit entry.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub async fn stop_vm(&self, actor: &Actor, vm_id: &str) -> Result<Outcome<VirtualMachine>> {
        let (actor, vm_id) = (actor.clone(), vm_id.to_string());
        self.detached(move |this| async move { this.run_stop(&actor, &vm_id).await })
            .await
    }

    async fn run_stop(&self, actor: &Actor, vm_id: &str) -> Result<Outcome<VirtualMachine>> {
        Self::require_operator(actor)?;
        let _vm_guard = self.vm_locks.lock(vm_id).await;
        let vm = self.owned_vm(actor, vm_id).await?;
        self.require_entitlement(actor).await?;

        if vm.status == VmStatus::Stopped {
            info!(vm = %vm.name, "already stopped");
            return Ok(Outcome::clean(vm));
        }

        self.hypervisor.acpi_stop(&vm.name).await?;
        Ok(self
            .commit_status(vm, VmStatus::Stopped, ActionKind::Stop, actor)
            .await)
    }

    /// Resize memory and vCPUs. A running VM is powered off first because
    /// the hypervisor rejects hot resize; it is left stopped.
    #[instrument(skip(self, actor, req), fields(tenant = %actor.tenant_id))]
    pub async fn configure_vm(
        &self,
        actor: &Actor,
        vm_id: &str,
        req: ConfigureVmRequest,
    ) -> Result<Outcome<ConfiguredVm>> {
        let (actor, vm_id) = (actor.clone(), vm_id.to_string());
        self.detached(move |this| async move { this.run_configure(&actor, &vm_id, req).await })
            .await
    }

    async fn run_configure(
        &self,
        actor: &Actor,
        vm_id: &str,
        req: ConfigureVmRequest,
    ) -> Result<Outcome<ConfiguredVm>> {
        Self::require_operator(actor)?;
        if req.memory_mb == 0 {
            return Err(OrchestratorError::InvalidInput(
                "memory must be at least 1 MB".to_string(),
            ));
        }
        let (cpus, adjustments) = self.settings.limits.clamp_cpus(req.cpus)?;

        let _vm_guard = self.vm_locks.lock(vm_id).await;
        let mut vm = self.owned_vm(actor, vm_id).await?;
        self.require_entitlement(actor).await?;

        let forced_stop = vm.status == VmStatus::Running;
        if forced_stop {
            self.hypervisor.power_off(&vm.name).await?;
        }

        if let Err(e) = self
            .hypervisor
            .set_resources(&vm.name, req.memory_mb, cpus)
            .await
        {
            let e = OrchestratorError::from(e);
            if !forced_stop {
                return Err(e);
            }
            // The VM is off now even though the resize failed.
            let now = Utc::now();
            let recorded = async {
                let mut tx = self.pool.begin().await?;
                vm::set_status(&mut *tx, &vm.id, VmStatus::Stopped, now).await?;
                audit::record(
                    &mut *tx,
                    ActionKind::Stop,
                    &vm.id,
                    vm.name.as_str(),
                    &actor.tenant_id,
                    now,
                )
                .await?;
                tx.commit().await?;
                Ok::<(), OrchestratorError>(())
            }
            .await;
            return Err(match recorded {
                Ok(()) => e,
                Err(db_err) => e.with_warning(ReconciliationWarning::new(
                    "configure",
                    &vm.id,
                    vm.name.as_str(),
                    format!("VM was powered off but the record still says running: {}", db_err),
                )),
            });
        }

        let status = if forced_stop {
            VmStatus::Stopped
        } else {
            vm.status
        };
        let now = Utc::now();
        let committed = async {
            let mut tx = self.pool.begin().await?;
            vm::set_resources(&mut *tx, &vm.id, req.memory_mb, cpus, status, now).await?;
            audit::record(
                &mut *tx,
                ActionKind::Configure,
                &vm.id,
                vm.name.as_str(),
                &actor.tenant_id,
                now,
            )
            .await?;
            tx.commit().await?;
            Ok::<(), OrchestratorError>(())
        }
        .await;

        vm.memory_mb = req.memory_mb;
        vm.cpus = cpus;
        vm.status = status;
        vm.updated_at = now;

        let configured = ConfiguredVm {
            vm,
            adjustments,
            forced_stop,
        };
        Ok(match committed {
            Ok(()) => Outcome::clean(configured),
            Err(e) => {
                let warning = ReconciliationWarning::new(
                    "configure",
                    &configured.vm.id,
                    configured.vm.name.as_str(),
                    format!("hypervisor resized the VM but the record was not updated: {}", e),
                );
                Outcome::with_warning(configured, warning)
            }
        })
    }

    /// Unregister and delete remotely, then drop the row and its backups.
    /// The audit entry is written before the row goes.
    #[instrument(skip(self, actor), fields(tenant = %actor.tenant_id))]
    pub async fn delete_vm(&self, actor: &Actor, vm_id: &str) -> Result<Outcome<VirtualMachine>> {
        let (actor, vm_id) = (actor.clone(), vm_id.to_string());
        self.detached(move |this| async move { this.run_delete(&actor, &vm_id).await })
            .await
    }

    async fn run_delete(&self, actor: &Actor, vm_id: &str) -> Result<Outcome<VirtualMachine>> {
        Self::require_operator(actor)?;
        let _vm_guard = self.vm_locks.lock(vm_id).await;
        let vm = self.owned_vm(actor, vm_id).await?;

        self.hypervisor.unregister_and_delete(&vm.name).await?;

        let now = Utc::now();
        let committed = async {
            let mut tx = self.pool.begin().await?;
            audit::record(
                &mut *tx,
                ActionKind::Delete,
                &vm.id,
                vm.name.as_str(),
                &actor.tenant_id,
                now,
            )
            .await?;
            vm::delete_vm(&mut *tx, &vm.id).await?;
            tx.commit().await?;
            Ok::<(), OrchestratorError>(())
        }
        .await;

        Ok(match committed {
            Ok(()) => {
                info!(vm = %vm.name, "VM deleted");
                Outcome::clean(vm)
            }
            Err(e) => {
                let warning = ReconciliationWarning::new(
                    "delete",
                    &vm.id,
                    vm.name.as_str(),
                    format!("VM is gone from the hypervisor but its record remains: {}", e),
                );
                Outcome::with_warning(vm, warning)
            }
        })
    }

    /// Take a snapshot, charged to the VM owner's backup pool.
    #[instrument(skip(self, actor, req), fields(tenant = %actor.tenant_id))]
    pub async fn backup_vm(
        &self,
        actor: &Actor,
        vm_id: &str,
        req: BackupRequest,
    ) -> Result<Outcome<Backup>> {
        let (actor, vm_id) = (actor.clone(), vm_id.to_string());
        self.detached(move |this| async move { this.run_backup(&actor, &vm_id, req).await })
            .await
    }

    async fn run_backup(
        &self,
        actor: &Actor,
        vm_id: &str,
        req: BackupRequest,
    ) -> Result<Outcome<Backup>> {
        Self::require_operator(actor)?;
        let _vm_guard = self.vm_locks.lock(vm_id).await;
        let vm = self.owned_vm(actor, vm_id).await?;

        let pool_owner = {
            let mut conn = self.pool.acquire().await?;
            resolve_pool(&mut conn, &vm.owner_id, Utc::now())
                .await?
                .owner_id
        };
        let _pool_guard = self.pool_locks.lock(&pool_owner).await;

        let admission = {
            let mut conn = self.pool.acquire().await?;
            entitlement::admit(&mut conn, &vm.owner_id, QuotaResource::Backups, Utc::now())
                .await?
        };

        let now = Utc::now();
        let backup_id = Uuid::new_v4().to_string();
        let backup = Backup {
            snapshot_name: backup::snapshot_name_for(now, &backup_id),
            id: backup_id,
            vm_id: vm.id.clone(),
            tenant_id: vm.owner_id.clone(),
            requested_by: actor.tenant_id.clone(),
            description: req.description,
            created_at: now,
        };

        self.hypervisor
            .take_snapshot(&vm.name, &backup.snapshot_name, backup.description.as_deref())
            .await?;

        let committed = async {
            let mut tx = self.pool.begin().await?;
            let inserted = backup::insert_if_room(
                &mut *tx,
                &backup,
                &admission.pool.owner_id,
                admission.limit(),
            )
            .await?;
            if !inserted {
                return Err(OrchestratorError::QuotaExceeded {
                    resource: QuotaResource::Backups,
                    usage: admission.limit(),
                    limit: admission.limit(),
                });
            }
            audit::record(
                &mut *tx,
                ActionKind::Backup,
                &vm.id,
                vm.name.as_str(),
                &actor.tenant_id,
                now,
            )
            .await?;
            tx.commit().await?;
            Ok::<(), OrchestratorError>(())
        }
        .await;

        match committed {
            Ok(()) => {
                info!(vm = %vm.name, snapshot = %backup.snapshot_name, "backup recorded");
                Ok(Outcome::clean(backup))
            }
            Err(e @ OrchestratorError::QuotaExceeded { .. }) => {
                Err(e.with_warning(ReconciliationWarning::new(
                    "backup",
                    &vm.id,
                    vm.name.as_str(),
                    format!(
                        "snapshot {} was taken but the pool filled up concurrently",
                        backup.snapshot_name
                    ),
                )))
            }
            Err(e) => {
                let warning = ReconciliationWarning::new(
                    "backup",
                    &vm.id,
                    vm.name.as_str(),
                    format!(
                        "snapshot {} exists but was not recorded: {}",
                        backup.snapshot_name, e
                    ),
                );
                Ok(Outcome::with_warning(backup, warning))
            }
        }
    }

    /// Hand a VM to another tenant. The reassignment and its audit entry
    /// commit together; both owners are notified only after that.
    #[instrument(skip(self, actor, req), fields(tenant = %actor.tenant_id, new_owner = %req.new_owner))]
    pub async fn transfer_vm(
        &self,
        actor: &Actor,
        vm_id: &str,
        req: TransferVmRequest,
    ) -> Result<VirtualMachine> {
        let (actor, vm_id) = (actor.clone(), vm_id.to_string());
        self.detached(move |this| async move { this.run_transfer(&actor, &vm_id, req).await })
            .await
    }

    async fn run_transfer(
        &self,
        actor: &Actor,
        vm_id: &str,
        req: TransferVmRequest,
    ) -> Result<VirtualMachine> {
        Self::require_operator(actor)?;
        let _vm_guard = self.vm_locks.lock(vm_id).await;
        let mut vm = self.owned_vm(actor, vm_id).await?;

        let recipient = tenant::find_tenant_by_username(&self.pool, &req.new_owner)
            .await?
            .ok_or_else(|| OrchestratorError::NotFound(format!("tenant '{}'", req.new_owner)))?;
        if recipient.id == vm.owner_id {
            return Err(OrchestratorError::InvalidInput(format!(
                "VM {} already belongs to {}",
                vm.name, recipient.username
            )));
        }
        let previous = tenant::get_tenant(&self.pool, &vm.owner_id).await?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await?;
        vm::set_owner(&mut *tx, &vm.id, &previous.id, &recipient.id, now).await?;
        audit::record(
            &mut *tx,
            ActionKind::Transfer,
            &vm.id,
            vm.name.as_str(),
            &actor.tenant_id,
            now,
        )
        .await?;
        tx.commit().await?;

        vm.owner_id = recipient.id.clone();
        vm.updated_at = now;
        info!(vm = %vm.name, from = %previous.username, to = %recipient.username, "VM transferred");

        let notifications = [
            Notification {
                recipient: recipient.email.clone(),
                subject: format!("VM {} transferred to you", vm.name),
                body: format!(
                    "{} transferred the virtual machine {} to your account.",
                    previous.username, vm.name
                ),
            },
            Notification {
                recipient: previous.email.clone(),
                subject: format!("VM {} transferred", vm.name),
                body: format!(
                    "The virtual machine {} now belongs to {}.",
                    vm.name, recipient.username
                ),
            },
        ];
        for notification in &notifications {
            if let Err(e) = self.notifier.notify(notification).await {
                warn!(error = %e, vm = %vm.name, "transfer notification not delivered");
            }
        }

        Ok(vm)
    }
}
