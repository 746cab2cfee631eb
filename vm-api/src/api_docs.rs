use utoipa::OpenApi;
use vm_orchestrator::{
    ActionKind, AuditEntry, Backup, BackupRequest, ConfigureVmRequest, ConfiguredVm,
    CreateVmRequest, CreatedVm, Payment, PaymentStatus, QuotaReport, RatePlan,
    ReconciliationWarning, Subscription, Tenant, TenantReport, TransferVmRequest, VirtualMachine,
    VmStatus,
};

use crate::routes::{
    account::{ManagedTenantRequest, PlanRequest},
    vms::VmStateResponse,
};

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::health::health_check,
        crate::routes::health::readiness_check,
        crate::routes::plans::list_plans,
        crate::routes::vms::list_vms,
        crate::routes::vms::create_vm,
        crate::routes::vms::get_vm,
        crate::routes::vms::delete_vm,
        crate::routes::vms::start_vm,
        crate::routes::vms::stop_vm,
        crate::routes::vms::configure_vm,
        crate::routes::vms::transfer_vm,
        crate::routes::vms::vm_details,
        crate::routes::vms::vm_state,
        crate::routes::vms::list_snapshots,
        crate::routes::backups::list_backups,
        crate::routes::backups::create_backup,
        crate::routes::account::quota,
        crate::routes::account::get_subscription,
        crate::routes::account::subscribe,
        crate::routes::account::change_plan,
        crate::routes::account::list_payments,
        crate::routes::account::complete_payment,
        crate::routes::account::list_managed_tenants,
        crate::routes::account::add_managed_tenant,
        crate::routes::account::remove_managed_tenant,
        crate::routes::admin::audit_log,
        crate::routes::admin::list_all_payments,
        crate::routes::admin::deactivate_subscription,
        crate::routes::admin::activate_subscription,
        crate::routes::admin::list_tenants,
        crate::routes::admin::get_tenant,
    ),
    components(
        schemas(
            VirtualMachine,
            VmStatus,
            CreateVmRequest,
            CreatedVm,
            ConfigureVmRequest,
            ConfiguredVm,
            TransferVmRequest,
            VmStateResponse,
            Backup,
            BackupRequest,
            ReconciliationWarning,
            RatePlan,
            Subscription,
            PlanRequest,
            Payment,
            PaymentStatus,
            QuotaReport,
            Tenant,
            TenantReport,
            ManagedTenantRequest,
            AuditEntry,
            ActionKind
        )
    ),
    tags(
        (name = "vm-api", description = "VM hosting orchestration API")
    )
)]
pub struct ApiDoc;
