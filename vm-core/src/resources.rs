//! Resource ceilings and disk pricing.
//!
//! Requests above the plan-independent ceilings are clamped rather than
//! rejected. Every clamp is returned as an [`Adjustment`] so callers can
//! tell the user what was actually provisioned.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{Result, VmError};

/// Hard ceilings applied to every VM regardless of rate plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    #[serde(default = "default_max_disk_mb")]
    pub max_disk_mb: u32,

    #[serde(default = "default_max_cpus")]
    pub max_cpus: u32,
}

fn default_max_disk_mb() -> u32 {
    2048
}

fn default_max_cpus() -> u32 {
    2
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_disk_mb: default_max_disk_mb(),
            max_cpus: default_max_cpus(),
        }
    }
}

/// Requested (or provisioned) VM resources.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub disk_mb: u32,
    pub cpus: u32,
    pub memory_mb: u32,
}

/// One silently-applied clamp, reported back to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub field: String,
    pub requested: u32,
    pub applied: u32,
}

impl ResourceLimits {
    /// Clamp a full create request. Zero values are rejected outright.
    pub fn clamp(&self, spec: ResourceSpec) -> Result<(ResourceSpec, Vec<Adjustment>)> {
        if spec.disk_mb == 0 {
            return Err(VmError::Validation("disk size must be at least 1 MB".into()));
        }
        if spec.memory_mb == 0 {
            return Err(VmError::Validation("memory must be at least 1 MB".into()));
        }

        let mut adjustments = Vec::new();
        let disk_mb = clamp_field("disk_mb", spec.disk_mb, self.max_disk_mb, &mut adjustments);
        let cpus = self.clamp_cpus_into(spec.cpus, &mut adjustments)?;

        Ok((
            ResourceSpec {
                disk_mb,
                cpus,
                memory_mb: spec.memory_mb,
            },
            adjustments,
        ))
    }

    /// Clamp a vCPU count on its own (used by resize).
    pub fn clamp_cpus(&self, cpus: u32) -> Result<(u32, Vec<Adjustment>)> {
        let mut adjustments = Vec::new();
        let cpus = self.clamp_cpus_into(cpus, &mut adjustments)?;
        Ok((cpus, adjustments))
    }

    fn clamp_cpus_into(&self, cpus: u32, adjustments: &mut Vec<Adjustment>) -> Result<u32> {
        if cpus == 0 {
            return Err(VmError::Validation("cpu count must be at least 1".into()));
        }
        Ok(clamp_field("cpus", cpus, self.max_cpus, adjustments))
    }
}

fn clamp_field(field: &str, requested: u32, ceiling: u32, out: &mut Vec<Adjustment>) -> u32 {
    if requested <= ceiling {
        return requested;
    }

    warn!(
        field,
        requested, ceiling, "resource request above ceiling, clamping"
    );
    out.push(Adjustment {
        field: field.to_string(),
        requested,
        applied: ceiling,
    });
    ceiling
}

/// Extra-disk pricing: everything above the included allowance is billed
/// per MB.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pricing {
    #[serde(default = "default_included_disk_mb")]
    pub included_disk_mb: u32,

    #[serde(default = "default_cents_per_mb")]
    pub cents_per_mb: i64,

    /// Days a pending payment stays payable before it is overdue.
    #[serde(default = "default_grace_days")]
    pub payment_grace_days: i64,

    /// Length of a subscription period granted by checkout.
    #[serde(default = "default_period_days")]
    pub subscription_period_days: i64,
}

fn default_included_disk_mb() -> u32 {
    1024
}

fn default_cents_per_mb() -> i64 {
    1
}

fn default_grace_days() -> i64 {
    30
}

fn default_period_days() -> i64 {
    30
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            included_disk_mb: default_included_disk_mb(),
            cents_per_mb: default_cents_per_mb(),
            payment_grace_days: default_grace_days(),
            subscription_period_days: default_period_days(),
        }
    }
}

impl Pricing {
    /// `max(disk - included, 0) * price_per_mb`, in cents.
    pub fn disk_price_cents(&self, disk_mb: u32) -> i64 {
        let extra_mb = disk_mb.saturating_sub(self.included_disk_mb);
        i64::from(extra_mb) * self.cents_per_mb
    }
}
