//! Append-only audit log.
//!
//! Entries keep the VM name next to its id so the trail stays readable
//! after the VM row is deleted. The table rejects UPDATE and DELETE at the
//! database level.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::SqliteExecutor;
use tracing::instrument;
use utoipa::{IntoParams, ToSchema};

use crate::db::from_unix;
use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Create,
    Start,
    Stop,
    Configure,
    Delete,
    Backup,
    Transfer,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Create => "create",
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Configure => "configure",
            ActionKind::Delete => "delete",
            ActionKind::Backup => "backup",
            ActionKind::Transfer => "transfer",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuditEntry {
    pub seq: i64,
    pub action: ActionKind,
    pub vm_id: String,
    pub vm_name: String,
    pub actor_id: String,
    pub created_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    seq: i64,
    action: ActionKind,
    vm_id: String,
    vm_name: String,
    actor_id: String,
    created_at: i64,
}

impl From<AuditRow> for AuditEntry {
    fn from(row: AuditRow) -> Self {
        Self {
            seq: row.seq,
            action: row.action,
            vm_id: row.vm_id,
            vm_name: row.vm_name,
            actor_id: row.actor_id,
            created_at: from_unix(row.created_at),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, IntoParams, ToSchema)]
#[into_params(parameter_in = Query)]
pub struct AuditFilter {
    pub vm_id: Option<String>,
    pub actor_id: Option<String>,
    pub action: Option<ActionKind>,
    pub limit: Option<i64>,
}

/// Write one entry. Store failures surface to the caller.
#[instrument(skip(executor))]
pub async fn record(
    executor: impl SqliteExecutor<'_>,
    action: ActionKind,
    vm_id: &str,
    vm_name: &str,
    actor_id: &str,
    at: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO audit_log (action, vm_id, vm_name, actor_id, created_at) VALUES (?, ?, ?, ?, ?)",
    )
    .bind(action)
    .bind(vm_id)
    .bind(vm_name)
    .bind(actor_id)
    .bind(at.timestamp())
    .execute(executor)
    .await?;
    Ok(())
}

/// Entries matching `filter`, newest first.
pub async fn list(executor: impl SqliteExecutor<'_>, filter: &AuditFilter) -> Result<Vec<AuditEntry>> {
    let mut query = "SELECT * FROM audit_log WHERE 1=1".to_string();

    if filter.vm_id.is_some() {
        query.push_str(" AND vm_id = ?");
    }
    if filter.actor_id.is_some() {
        query.push_str(" AND actor_id = ?");
    }
    if filter.action.is_some() {
        query.push_str(" AND action = ?");
    }

    query.push_str(" ORDER BY created_at DESC, seq DESC LIMIT ?");

    let mut q = sqlx::query_as::<_, AuditRow>(&query);

    if let Some(vm_id) = &filter.vm_id {
        q = q.bind(vm_id);
    }
    if let Some(actor_id) = &filter.actor_id {
        q = q.bind(actor_id);
    }
    if let Some(action) = &filter.action {
        q = q.bind(*action);
    }
    q = q.bind(filter.limit.unwrap_or(-1));

    let rows = q.fetch_all(executor).await?;
    Ok(rows.into_iter().map(AuditEntry::from).collect())
}
