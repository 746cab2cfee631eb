use serde::Serialize;
use thiserror::Error;
use utoipa::ToSchema;
use vm_provider::ProviderError;

pub type Result<T> = std::result::Result<T, OrchestratorError>;

/// Which pooled counter an admission check ran against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaResource {
    Vms,
    Backups,
}

impl std::fmt::Display for QuotaResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaResource::Vms => f.write_str("VM"),
            QuotaResource::Backups => f.write_str("backup"),
        }
    }
}

/// Why a tenant holds no usable entitlement. Routed to checkout rather than
/// shown as a quota message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntitlementReason {
    NoSubscription,
    Inactive,
    NoPlan,
}

impl std::fmt::Display for EntitlementReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EntitlementReason::NoSubscription => f.write_str("no subscription"),
            EntitlementReason::Inactive => f.write_str("subscription inactive"),
            EntitlementReason::NoPlan => f.write_str("subscription has no rate plan"),
        }
    }
}

#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("Cannot reach hypervisor host: {0}")]
    Transport(String),

    #[error("Hypervisor rejected `{command}`: {message}")]
    Command { command: String, message: String },

    #[error("{resource} limit reached: {usage} of {limit} in use")]
    QuotaExceeded {
        resource: QuotaResource,
        usage: i64,
        limit: i64,
    },

    #[error("No active entitlement for tenant {tenant_id}: {reason}")]
    NoEntitlement {
        tenant_id: String,
        reason: EntitlementReason,
    },

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Tenant {actor} does not own VM {vm}")]
    OwnershipViolation { actor: String, vm: String },

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Operation task failed: {0}")]
    Task(String),

    /// The operation failed after a remote side effect that could not be
    /// undone.
    #[error("{source}; remote and local state diverged")]
    Diverged {
        #[source]
        source: Box<OrchestratorError>,
        warnings: Vec<ReconciliationWarning>,
    },
}

impl OrchestratorError {
    /// Expected, user-facing denials that never touched the hypervisor.
    pub fn is_denial(&self) -> bool {
        matches!(
            self.root(),
            OrchestratorError::QuotaExceeded { .. }
                | OrchestratorError::NoEntitlement { .. }
                | OrchestratorError::OwnershipViolation { .. }
                | OrchestratorError::Forbidden(_)
        )
    }

    /// Stable machine-readable kind, used by the HTTP layer.
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Transport(_) => "transport_error",
            OrchestratorError::Command { .. } => "command_error",
            OrchestratorError::QuotaExceeded { .. } => "quota_exceeded",
            OrchestratorError::NoEntitlement { .. } => "no_entitlement",
            OrchestratorError::NotFound(_) => "not_found",
            OrchestratorError::OwnershipViolation { .. } => "ownership_violation",
            OrchestratorError::Forbidden(_) => "forbidden",
            OrchestratorError::InvalidInput(_) => "invalid_input",
            OrchestratorError::InvalidState(_) => "invalid_state",
            OrchestratorError::Conflict(_) => "conflict",
            OrchestratorError::Database(_)
            | OrchestratorError::Migration(_)
            | OrchestratorError::Serialization(_)
            | OrchestratorError::Io(_)
            | OrchestratorError::Task(_) => "internal",
            OrchestratorError::Diverged { source, .. } => source.kind(),
        }
    }

    /// The failure itself, looking through attached reconciliation warnings.
    pub fn root(&self) -> &OrchestratorError {
        match self {
            OrchestratorError::Diverged { source, .. } => source.root(),
            other => other,
        }
    }

    pub fn warnings(&self) -> &[ReconciliationWarning] {
        match self {
            OrchestratorError::Diverged { warnings, .. } => warnings,
            _ => &[],
        }
    }

    /// Attach a warning about a remote change this failure left behind.
    pub fn with_warning(self, warning: ReconciliationWarning) -> Self {
        match self {
            OrchestratorError::Diverged {
                source,
                mut warnings,
            } => {
                warnings.push(warning);
                OrchestratorError::Diverged { source, warnings }
            }
            other => OrchestratorError::Diverged {
                source: Box::new(other),
                warnings: vec![warning],
            },
        }
    }
}

impl From<tokio::task::JoinError> for OrchestratorError {
    fn from(err: tokio::task::JoinError) -> Self {
        OrchestratorError::Task(err.to_string())
    }
}

impl From<ProviderError> for OrchestratorError {
    fn from(err: ProviderError) -> Self {
        match err {
            ProviderError::Transport(msg) => OrchestratorError::Transport(msg),
            ProviderError::Command { command, message } => {
                OrchestratorError::Command { command, message }
            }
        }
    }
}

impl From<vm_core::VmError> for OrchestratorError {
    fn from(err: vm_core::VmError) -> Self {
        match err {
            vm_core::VmError::Validation(msg) => OrchestratorError::InvalidInput(msg),
            vm_core::VmError::Io(e) => OrchestratorError::Io(e),
            other => OrchestratorError::InvalidInput(other.to_string()),
        }
    }
}

/// The remote side effect happened but the local record could not be
/// brought in line with it. Not retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct ReconciliationWarning {
    pub operation: String,
    pub vm_id: String,
    pub vm_name: String,
    pub detail: String,
}

impl ReconciliationWarning {
    pub fn new(
        operation: &str,
        vm_id: &str,
        vm_name: &str,
        detail: impl Into<String>,
    ) -> Self {
        let warning = Self {
            operation: operation.to_string(),
            vm_id: vm_id.to_string(),
            vm_name: vm_name.to_string(),
            detail: detail.into(),
        };
        tracing::warn!(
            target: "reconciliation",
            operation = %warning.operation,
            vm_id = %warning.vm_id,
            vm_name = %warning.vm_name,
            detail = %warning.detail,
            "remote and local state diverged"
        );
        warning
    }
}

/// Result of an operation that may have "succeeded with warning".
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct Outcome<T> {
    pub value: T,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<ReconciliationWarning>,
}

impl<T> Outcome<T> {
    pub fn clean(value: T) -> Self {
        Self {
            value,
            warnings: Vec::new(),
        }
    }

    pub fn with_warning(value: T, warning: ReconciliationWarning) -> Self {
        Self {
            value,
            warnings: vec![warning],
        }
    }

    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }
}
