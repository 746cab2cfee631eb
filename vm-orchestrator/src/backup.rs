use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;
use utoipa::ToSchema;

use crate::db::from_unix;
use crate::entitlement::BACKUP_POOL_USAGE;
use crate::error::Result;

/// Snapshot reference. Create-only.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Backup {
    pub id: String,
    pub vm_id: String,
    /// Tenant whose pool the backup counts against (the VM owner).
    pub tenant_id: String,
    pub requested_by: String,
    pub snapshot_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct BackupRow {
    id: String,
    vm_id: String,
    tenant_id: String,
    requested_by: String,
    snapshot_name: String,
    description: Option<String>,
    created_at: i64,
}

impl From<BackupRow> for Backup {
    fn from(row: BackupRow) -> Self {
        Self {
            id: row.id,
            vm_id: row.vm_id,
            tenant_id: row.tenant_id,
            requested_by: row.requested_by,
            snapshot_name: row.snapshot_name,
            description: row.description,
            created_at: from_unix(row.created_at),
        }
    }
}

/// Snapshot name from the backup time and id, e.g.
/// `backup-20240501T103000Z-3f2a9c1e`. The id suffix keeps two backups taken
/// within the same second apart.
pub fn snapshot_name_for(now: DateTime<Utc>, backup_id: &str) -> String {
    let suffix: String = backup_id.chars().filter(|c| *c != '-').take(8).collect();
    format!("backup-{}-{}", now.format("%Y%m%dT%H%M%SZ"), suffix)
}

/// Insert `backup` only if the pool still has room; `false` when full.
pub async fn insert_if_room(
    executor: impl SqliteExecutor<'_>,
    backup: &Backup,
    pool_owner: &str,
    limit: i64,
) -> Result<bool> {
    let sql = format!(
        "INSERT INTO backups (id, vm_id, tenant_id, requested_by, snapshot_name, description, created_at)
         SELECT ?, ?, ?, ?, ?, ?, ?
         WHERE ({}) < ?",
        BACKUP_POOL_USAGE
    );

    let result = sqlx::query(&sql)
        .bind(&backup.id)
        .bind(&backup.vm_id)
        .bind(&backup.tenant_id)
        .bind(&backup.requested_by)
        .bind(&backup.snapshot_name)
        .bind(&backup.description)
        .bind(backup.created_at.timestamp())
        .bind(pool_owner)
        .bind(pool_owner)
        .bind(limit)
        .execute(executor)
        .await?;

    Ok(result.rows_affected() == 1)
}

pub async fn list_for_vm(executor: impl SqliteExecutor<'_>, vm_id: &str) -> Result<Vec<Backup>> {
    let rows = sqlx::query_as::<_, BackupRow>(
        "SELECT * FROM backups WHERE vm_id = ? ORDER BY created_at DESC, id",
    )
    .bind(vm_id)
    .fetch_all(executor)
    .await?;
    Ok(rows.into_iter().map(Backup::from).collect())
}
