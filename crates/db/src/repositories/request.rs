use std::str::FromStr;

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::Row;

use ladder_core::domain::approval::ApprovalStatus;
use ladder_core::domain::request::{ApprovalRequest, ArtifactRef, RequestId, RequestUpdate};
use ladder_core::errors::StoreError;
use ladder_core::ports::RequestStore;

use super::{decode_err, level_from_db, parse_optional_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const REQUEST_COLUMNS: &str = "id, title, submitted_by, total_amount, current_level, max_level,
     sent_to, status, approval_comment, artifacts_json, approved_destination,
     approved_at, rejected_at, created_at, updated_at";

pub struct SqlRequestRepository {
    pool: DbPool,
}

impl SqlRequestRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

pub(crate) fn parse_status(raw: &str) -> Result<ApprovalStatus, RepositoryError> {
    ApprovalStatus::parse(raw)
        .ok_or_else(|| RepositoryError::Decode(format!("unknown approval status `{raw}`")))
}

fn row_to_request(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalRequest, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let title: String = row.try_get("title").map_err(decode_err)?;
    let submitted_by: String = row.try_get("submitted_by").map_err(decode_err)?;
    let total_amount: String = row.try_get("total_amount").map_err(decode_err)?;
    let current_level: Option<i64> = row.try_get("current_level").map_err(decode_err)?;
    let max_level: Option<i64> = row.try_get("max_level").map_err(decode_err)?;
    let sent_to: Option<String> = row.try_get("sent_to").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let approval_comment: Option<String> = row.try_get("approval_comment").map_err(decode_err)?;
    let artifacts_json: String = row.try_get("artifacts_json").map_err(decode_err)?;
    let approved_destination: Option<String> =
        row.try_get("approved_destination").map_err(decode_err)?;
    let approved_at: Option<String> = row.try_get("approved_at").map_err(decode_err)?;
    let rejected_at: Option<String> = row.try_get("rejected_at").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;
    let updated_at: String = row.try_get("updated_at").map_err(decode_err)?;

    let total_amount = Decimal::from_str(&total_amount)
        .map_err(|e| RepositoryError::Decode(format!("total_amount `{total_amount}`: {e}")))?;
    let artifacts: Vec<ArtifactRef> = serde_json::from_str(&artifacts_json)
        .map_err(|e| RepositoryError::Decode(format!("artifacts_json: {e}")))?;

    Ok(ApprovalRequest {
        id: RequestId(id),
        title,
        submitted_by,
        total_amount,
        current_level: current_level.map(level_from_db).transpose()?,
        max_level: max_level.map(level_from_db).transpose()?,
        sent_to,
        status: parse_status(&status)?,
        approval_comment,
        artifacts,
        approved_destination,
        approved_at: parse_optional_timestamp(approved_at)?,
        rejected_at: parse_optional_timestamp(rejected_at)?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

#[async_trait]
impl RequestStore for SqlRequestRepository {
    async fn get_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        let row = sqlx::query(&format!("SELECT {REQUEST_COLUMNS} FROM approval_request WHERE id = ?"))
            .bind(&id.0)
            .fetch_optional(&self.pool)
            .await
            .map_err(RepositoryError::from)?;

        match row {
            Some(ref r) => Ok(Some(row_to_request(r)?)),
            None => Ok(None),
        }
    }

    async fn create(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let artifacts_json = serde_json::to_string(&request.artifacts)
            .map_err(|e| StoreError::Decode(format!("artifacts: {e}")))?;

        sqlx::query(
            "INSERT INTO approval_request (id, title, submitted_by, total_amount, current_level,
                                           max_level, sent_to, status, approval_comment,
                                           artifacts_json, approved_destination, approved_at,
                                           rejected_at, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&request.id.0)
        .bind(&request.title)
        .bind(&request.submitted_by)
        .bind(request.total_amount.to_string())
        .bind(request.current_level.map(i64::from))
        .bind(request.max_level.map(i64::from))
        .bind(&request.sent_to)
        .bind(request.status.as_str())
        .bind(&request.approval_comment)
        .bind(artifacts_json)
        .bind(&request.approved_destination)
        .bind(request.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(request.rejected_at.map(|dt| dt.to_rfc3339()))
        .bind(request.created_at.to_rfc3339())
        .bind(request.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn update_if_pending(
        &self,
        id: &RequestId,
        update: &RequestUpdate,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE approval_request SET
                 status = COALESCE(?, status),
                 current_level = COALESCE(?, current_level),
                 max_level = COALESCE(?, max_level),
                 sent_to = COALESCE(?, sent_to),
                 approval_comment = COALESCE(?, approval_comment),
                 approved_at = COALESCE(?, approved_at),
                 rejected_at = COALESCE(?, rejected_at),
                 updated_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(update.status.map(|status| status.as_str()))
        .bind(update.current_level.map(i64::from))
        .bind(update.max_level.map(i64::from))
        .bind(&update.sent_to)
        .bind(&update.approval_comment)
        .bind(update.approved_at.map(|dt| dt.to_rfc3339()))
        .bind(update.rejected_at.map(|dt| dt.to_rfc3339()))
        .bind(update.updated_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(result.rows_affected() == 1)
    }
}
