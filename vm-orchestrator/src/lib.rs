//! VM hosting business logic
//!
//! This crate owns the system of record (SQLite) and the rules around it:
//! entitlements and delegated quota pools, the append-only audit log,
//! payments, and the VM lifecycle orchestration that drives the remote
//! hypervisor. It is consumed by the vm-api HTTP service but can also be
//! used by CLI commands or background workers.

pub mod account;
pub mod audit;
pub mod backup;
pub mod db;
pub mod entitlement;
pub mod error;
pub mod locks;
pub mod notify;
pub mod orchestrator;
pub mod payment;
pub mod plan;
pub mod subscription;
pub mod tenant;
pub mod vm;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use account::QuotaReport;
pub use audit::{ActionKind, AuditEntry, AuditFilter};
pub use backup::Backup;
pub use entitlement::PlanLimit;
pub use error::{
    EntitlementReason, OrchestratorError, Outcome, QuotaResource, ReconciliationWarning, Result,
};
pub use notify::{LogNotifier, Notification, Notifier, WebhookNotifier};
pub use orchestrator::{
    BackupRequest, ConfigureVmRequest, ConfiguredVm, CreateVmRequest, CreatedVm,
    OrchestratorSettings, TransferVmRequest, VmOrchestrator,
};
pub use payment::{Payment, PaymentStatus};
pub use plan::RatePlan;
pub use subscription::Subscription;
pub use tenant::{Tenant, TenantReport};
pub use vm::{VirtualMachine, VmStatus};
