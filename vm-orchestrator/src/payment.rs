//! Charges and good standing.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{SqliteConnection, SqliteExecutor};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::db::from_unix;
use crate::error::{OrchestratorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema, sqlx::Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Payment {
    pub id: String,
    pub tenant_id: String,
    pub amount_cents: i64,
    pub status: PaymentStatus,
    pub description: String,
    pub created_at: DateTime<Utc>,
    pub due_date: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// A charge due `grace_days` after `now`.
    pub fn pending(
        tenant_id: &str,
        amount_cents: i64,
        description: impl Into<String>,
        now: DateTime<Utc>,
        grace_days: i64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            amount_cents,
            status: PaymentStatus::Pending,
            description: description.into(),
            created_at: now,
            due_date: now + Duration::days(grace_days),
            completed_at: None,
        }
    }

    /// A charge settled at checkout.
    pub fn completed(
        tenant_id: &str,
        amount_cents: i64,
        description: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            amount_cents,
            status: PaymentStatus::Completed,
            description: description.into(),
            created_at: now,
            due_date: now,
            completed_at: Some(now),
        }
    }

    /// Still pending strictly after the due date.
    pub fn is_overdue_at(&self, now: DateTime<Utc>) -> bool {
        self.status == PaymentStatus::Pending && now > self.due_date
    }

    pub fn is_overdue(&self) -> bool {
        self.is_overdue_at(Utc::now())
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: String,
    tenant_id: String,
    amount_cents: i64,
    status: PaymentStatus,
    description: String,
    created_at: i64,
    due_date: i64,
    completed_at: Option<i64>,
}

impl From<PaymentRow> for Payment {
    fn from(row: PaymentRow) -> Self {
        Self {
            id: row.id,
            tenant_id: row.tenant_id,
            amount_cents: row.amount_cents,
            status: row.status,
            description: row.description,
            created_at: from_unix(row.created_at),
            due_date: from_unix(row.due_date),
            completed_at: row.completed_at.map(from_unix),
        }
    }
}

pub async fn insert_payment(executor: impl SqliteExecutor<'_>, payment: &Payment) -> Result<()> {
    sqlx::query(
        "INSERT INTO payments (id, tenant_id, amount_cents, status, description, created_at, due_date, completed_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(&payment.id)
    .bind(&payment.tenant_id)
    .bind(payment.amount_cents)
    .bind(payment.status)
    .bind(&payment.description)
    .bind(payment.created_at.timestamp())
    .bind(payment.due_date.timestamp())
    .bind(payment.completed_at.map(|t| t.timestamp()))
    .execute(executor)
    .await?;
    Ok(())
}

pub async fn get_payment(executor: impl SqliteExecutor<'_>, id: &str) -> Result<Payment> {
    let row = sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments WHERE id = ?")
        .bind(id)
        .fetch_optional(executor)
        .await?
        .ok_or_else(|| OrchestratorError::NotFound(format!("payment {}", id)))?;
    Ok(row.into())
}

/// Payments for one tenant, or every tenant when `tenant_id` is `None`.
pub async fn list_payments(
    executor: impl SqliteExecutor<'_>,
    tenant_id: Option<&str>,
) -> Result<Vec<Payment>> {
    let rows = match tenant_id {
        Some(tenant_id) => {
            sqlx::query_as::<_, PaymentRow>(
                "SELECT * FROM payments WHERE tenant_id = ? ORDER BY created_at DESC, id",
            )
            .bind(tenant_id)
            .fetch_all(executor)
            .await?
        }
        None => {
            sqlx::query_as::<_, PaymentRow>("SELECT * FROM payments ORDER BY created_at DESC, id")
                .fetch_all(executor)
                .await?
        }
    };
    Ok(rows.into_iter().map(Payment::from).collect())
}

/// Move a payment from Pending to Completed. A payment completes once.
pub async fn mark_completed(
    conn: &mut SqliteConnection,
    id: &str,
    now: DateTime<Utc>,
) -> Result<Payment> {
    let result = sqlx::query(
        "UPDATE payments SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
    )
    .bind(PaymentStatus::Completed)
    .bind(now.timestamp())
    .bind(id)
    .bind(PaymentStatus::Pending)
    .execute(&mut *conn)
    .await?;

    let payment = get_payment(&mut *conn, id).await?;
    if result.rows_affected() == 0 {
        return Err(OrchestratorError::InvalidState(format!(
            "payment {} is already completed",
            id
        )));
    }
    Ok(payment)
}

/// Number of pending payments for `tenant_id` due before `now`.
pub async fn count_overdue(
    executor: impl SqliteExecutor<'_>,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> Result<i64> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM payments WHERE tenant_id = ? AND status = ? AND due_date < ?",
    )
    .bind(tenant_id)
    .bind(PaymentStatus::Pending)
    .bind(now.timestamp())
    .fetch_one(executor)
    .await?;
    Ok(count)
}

/// Good standing is computed, never stored: zero overdue payments.
pub async fn is_in_good_standing_at(
    executor: impl SqliteExecutor<'_>,
    tenant_id: &str,
    now: DateTime<Utc>,
) -> Result<bool> {
    Ok(count_overdue(executor, tenant_id, now).await? == 0)
}
