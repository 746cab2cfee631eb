use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;
use utoipa::ToSchema;
use vm_core::VmName;

use crate::db::{from_unix, is_unique_violation};
use crate::entitlement::VM_POOL_USAGE;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum VmStatus {
    Stopped,
    Running,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct VirtualMachine {
    pub id: String,
    #[schema(value_type = String, example = "web01")]
    pub name: VmName,
    pub owner_id: String,
    pub status: VmStatus,
    pub disk_size_mb: u32,
    pub cpus: u32,
    pub memory_mb: u32,
    pub price_cents: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct VmRow {
    id: String,
    name: String,
    owner_id: String,
    status: VmStatus,
    disk_size_mb: i64,
    cpus: i64,
    memory_mb: i64,
    price_cents: i64,
    created_at: i64,
    updated_at: i64,
}

fn to_u32(field: &str, value: i64) -> Result<u32> {
    u32::try_from(value)
        .map_err(|_| OrchestratorError::InvalidState(format!("{} out of range: {}", field, value)))
}

impl TryFrom<VmRow> for VirtualMachine {
    type Error = OrchestratorError;

    fn try_from(row: VmRow) -> Result<Self> {
        let name = VmName::parse(row.name.as_str()).map_err(|e| {
            OrchestratorError::InvalidState(format!("stored VM {} has a bad name: {}", row.id, e))
        })?;
        Ok(Self {
            id: row.id,
            name,
            owner_id: row.owner_id,
            status: row.status,
            disk_size_mb: to_u32("disk_size_mb", row.disk_size_mb)?,
            cpus: to_u32("cpus", row.cpus)?,
            memory_mb: to_u32("memory_mb", row.memory_mb)?,
            price_cents: row.price_cents,
            created_at: from_unix(row.created_at),
            updated_at: from_unix(row.updated_at),
        })
    }
}

/// Insert `vm` only if its pool still has room. Returns `false` when the
/// count check lost, so concurrent writers cannot jointly exceed the limit.
pub async fn insert_if_room(
    executor: impl SqliteExecutor<'_>,
    vm: &VirtualMachine,
    pool_owner: &str,
    limit: i64,
) -> Result<bool> {
    let sql = format!(
        "INSERT INTO virtual_machines (id, name, owner_id, status, disk_size_mb, cpus, memory_mb, price_cents, created_at, updated_at)
         SELECT ?, ?, ?, ?, ?, ?, ?, ?, ?, ?
         WHERE ({}) < ?",
        VM_POOL_USAGE
    );

    let result = sqlx::query(&sql)
        .bind(&vm.id)
        .bind(vm.name.as_str())
        .bind(&vm.owner_id)
        .bind(vm.status)
        .bind(i64::from(vm.disk_size_mb))
        .bind(i64::from(vm.cpus))
        .bind(i64::from(vm.memory_mb))
        .bind(vm.price_cents)
        .bind(vm.created_at.timestamp())
        .bind(vm.updated_at.timestamp())
        .bind(pool_owner)
        .bind(pool_owner)
        .bind(limit)
        .execute(executor)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                OrchestratorError::Conflict(format!("VM name '{}' is taken", vm.name))
            } else {
                e.into()
            }
        })?;

    Ok(result.rows_affected() == 1)
}

pub async fn get_vm(executor: impl SqliteExecutor<'_>, id: &str) -> Result<VirtualMachine> {
    sqlx::query_as::<_, VmRow>("SELECT * FROM virtual_machines WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("VM {}", id)))?
        .try_into()
}

pub async fn name_exists(executor: impl SqliteExecutor<'_>, name: &VmName) -> Result<bool> {
    let found = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM virtual_machines WHERE name = ?")
        .bind(name.as_str())
        .fetch_one(executor)
        .await?;
    Ok(found > 0)
}

/// VMs for one owner, or all VMs when `owner_id` is `None`.
pub async fn list_vms(
    executor: impl SqliteExecutor<'_>,
    owner_id: Option<&str>,
) -> Result<Vec<VirtualMachine>> {
    let rows = match owner_id {
        Some(owner) => {
            sqlx::query_as::<_, VmRow>(
                "SELECT * FROM virtual_machines WHERE owner_id = ? ORDER BY created_at DESC, name",
            )
            .bind(owner)
            .fetch_all(executor)
            .await?
        }
        None => {
            sqlx::query_as::<_, VmRow>(
                "SELECT * FROM virtual_machines ORDER BY created_at DESC, name",
            )
            .fetch_all(executor)
            .await?
        }
    };
    rows.into_iter().map(VirtualMachine::try_from).collect()
}

pub async fn set_status(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    status: VmStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query("UPDATE virtual_machines SET status = ?, updated_at = ? WHERE id = ?")
        .bind(status)
        .bind(now.timestamp())
        .bind(id)
        .execute(executor)
        .await?;
    expect_one(result.rows_affected(), id)
}

pub async fn set_resources(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    memory_mb: u32,
    cpus: u32,
    status: VmStatus,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE virtual_machines SET memory_mb = ?, cpus = ?, status = ?, updated_at = ? WHERE id = ?",
    )
    .bind(i64::from(memory_mb))
    .bind(i64::from(cpus))
    .bind(status)
    .bind(now.timestamp())
    .bind(id)
    .execute(executor)
    .await?;
    expect_one(result.rows_affected(), id)
}

/// Reassign ownership, guarded on the expected current owner.
pub async fn set_owner(
    executor: impl SqliteExecutor<'_>,
    id: &str,
    from_owner: &str,
    to_owner: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let result = sqlx::query(
        "UPDATE virtual_machines SET owner_id = ?, updated_at = ? WHERE id = ? AND owner_id = ?",
    )
    .bind(to_owner)
    .bind(now.timestamp())
    .bind(id)
    .bind(from_owner)
    .execute(executor)
    .await?;

    if result.rows_affected() == 0 {
        return Err(OrchestratorError::Conflict(format!(
            "VM {} changed owner concurrently",
            id
        )));
    }
    Ok(())
}

/// Delete the row; backups go with it.
pub async fn delete_vm(executor: impl SqliteExecutor<'_>, id: &str) -> Result<()> {
    let result = sqlx::query("DELETE FROM virtual_machines WHERE id = ?")
        .bind(id)
        .execute(executor)
        .await?;
    expect_one(result.rows_affected(), id)
}

fn expect_one(rows_affected: u64, id: &str) -> Result<()> {
    if rows_affected == 0 {
        return Err(OrchestratorError::NotFound(format!("VM {}", id)));
    }
    Ok(())
}
