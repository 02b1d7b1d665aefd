use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use ladder_core::domain::approval::{ApprovalStatus, ApprovalStep, StepId};
use ladder_core::domain::request::RequestId;
use ladder_core::errors::StoreError;
use ladder_core::ports::StepStore;

use super::request::parse_status;
use super::{decode_err, level_from_db, parse_optional_timestamp, parse_timestamp, RepositoryError};
use crate::DbPool;

const STEP_COLUMNS: &str =
    "id, request_id, level, approver_email, status, token, comment, acted_at, created_at";

pub struct SqlStepRepository {
    pool: DbPool,
}

impl SqlStepRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch_one_where(
        &self,
        column: &str,
        value: &str,
    ) -> Result<Option<ApprovalStep>, RepositoryError> {
        let row =
            sqlx::query(&format!("SELECT {STEP_COLUMNS} FROM approval_step WHERE {column} = ?"))
                .bind(value)
                .fetch_optional(&self.pool)
                .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_step(r)?)),
            None => Ok(None),
        }
    }
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStep, RepositoryError> {
    let id: String = row.try_get("id").map_err(decode_err)?;
    let request_id: String = row.try_get("request_id").map_err(decode_err)?;
    let level: i64 = row.try_get("level").map_err(decode_err)?;
    let approver_email: String = row.try_get("approver_email").map_err(decode_err)?;
    let status: String = row.try_get("status").map_err(decode_err)?;
    let token: String = row.try_get("token").map_err(decode_err)?;
    let comment: Option<String> = row.try_get("comment").map_err(decode_err)?;
    let acted_at: Option<String> = row.try_get("acted_at").map_err(decode_err)?;
    let created_at: String = row.try_get("created_at").map_err(decode_err)?;

    Ok(ApprovalStep {
        id: StepId(id),
        request_id: RequestId(request_id),
        level: level_from_db(level)?,
        approver_email,
        status: parse_status(&status)?,
        token,
        comment,
        acted_at: parse_optional_timestamp(acted_at)?,
        created_at: parse_timestamp(&created_at)?,
    })
}

#[async_trait]
impl StepStore for SqlStepRepository {
    async fn create(&self, step: &ApprovalStep) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_step (id, request_id, level, approver_email, status, token,
                                        comment, acted_at, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&step.id.0)
        .bind(&step.request_id.0)
        .bind(i64::from(step.level))
        .bind(&step.approver_email)
        .bind(step.status.as_str())
        .bind(&step.token)
        .bind(&step.comment)
        .bind(step.acted_at.map(|dt| dt.to_rfc3339()))
        .bind(step.created_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }

    async fn find_by_id(&self, id: &StepId) -> Result<Option<ApprovalStep>, StoreError> {
        Ok(self.fetch_one_where("id", &id.0).await?)
    }

    async fn list_for_request(&self, id: &RequestId) -> Result<Vec<ApprovalStep>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {STEP_COLUMNS} FROM approval_step WHERE request_id = ? ORDER BY level ASC"
        ))
        .bind(&id.0)
        .fetch_all(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(rows.iter().map(row_to_step).collect::<Result<Vec<_>, _>>()?)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ApprovalStep>, StoreError> {
        Ok(self.fetch_one_where("token", token).await?)
    }

    async fn transition_if_pending(
        &self,
        id: &StepId,
        status: ApprovalStatus,
        comment: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> Result<Option<ApprovalStep>, StoreError> {
        let result = sqlx::query(
            "UPDATE approval_step SET status = ?, comment = ?, acted_at = ?
             WHERE id = ? AND status = 'pending'",
        )
        .bind(status.as_str())
        .bind(comment)
        .bind(acted_at.to_rfc3339())
        .bind(&id.0)
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        Ok(self.fetch_one_where("id", &id.0).await?)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use ladder_core::domain::approval::{ApprovalStatus, ApprovalStep, StepId};
    use ladder_core::domain::request::{ApprovalRequest, NewApprovalRequest, RequestId};
    use ladder_core::errors::StoreError;
    use ladder_core::ports::{RequestStore, StepStore};

    use super::SqlStepRepository;
    use crate::repositories::SqlRequestRepository;
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    /// Insert a parent request so that FK constraints are satisfied.
    async fn insert_request(pool: &sqlx::SqlitePool, id: &str) {
        let repo = SqlRequestRepository::new(pool.clone());
        let request = ApprovalRequest::new(
            NewApprovalRequest {
                id: RequestId(id.to_string()),
                title: "Office chairs".to_string(),
                submitted_by: "buyer@example.com".to_string(),
                total_amount: Decimal::from(5_000),
                artifacts: Vec::new(),
                approved_destination: None,
            },
            Utc::now(),
        );
        repo.create(&request).await.expect("insert parent request");
    }

    fn sample_step(id: &str, request_id: &str, level: u32, token: &str) -> ApprovalStep {
        ApprovalStep {
            id: StepId(id.to_string()),
            request_id: RequestId(request_id.to_string()),
            level,
            approver_email: format!("approver{level}@example.com"),
            status: ApprovalStatus::Pending,
            token: token.to_string(),
            comment: None,
            acted_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn steps_are_found_by_id_token_and_request() {
        let pool = setup().await;
        insert_request(&pool, "REQ-1").await;
        let repo = SqlStepRepository::new(pool);
        repo.create(&sample_step("STEP-2", "REQ-1", 2, "tok-2")).await.expect("create 2");
        repo.create(&sample_step("STEP-1", "REQ-1", 1, "tok-1")).await.expect("create 1");

        let by_token = repo.find_by_token("tok-2").await.expect("find").expect("present");
        assert_eq!(by_token.id, StepId("STEP-2".to_string()));
        assert!(repo.find_by_token("tok-404").await.expect("find").is_none());

        let by_id = repo.find_by_id(&StepId("STEP-1".to_string())).await.expect("find");
        assert_eq!(by_id.map(|s| s.level), Some(1));

        let listed = repo.list_for_request(&RequestId("REQ-1".to_string())).await.expect("list");
        assert_eq!(listed.iter().map(|s| s.level).collect::<Vec<_>>(), vec![1, 2]);
    }

    #[tokio::test]
    async fn duplicate_level_or_token_is_a_conflict() {
        let pool = setup().await;
        insert_request(&pool, "REQ-1").await;
        let repo = SqlStepRepository::new(pool);
        repo.create(&sample_step("STEP-1", "REQ-1", 1, "tok-1")).await.expect("create");

        let same_level = repo.create(&sample_step("STEP-x", "REQ-1", 1, "tok-x")).await;
        assert!(matches!(same_level, Err(StoreError::Conflict(_))), "got {same_level:?}");

        let same_token = repo.create(&sample_step("STEP-y", "REQ-1", 2, "tok-1")).await;
        assert!(matches!(same_token, Err(StoreError::Conflict(_))), "got {same_token:?}");
    }

    #[tokio::test]
    async fn step_for_unknown_request_is_refused() {
        let repo = SqlStepRepository::new(setup().await);
        let orphan = repo.create(&sample_step("STEP-1", "REQ-missing", 1, "tok-1")).await;
        assert!(matches!(orphan, Err(StoreError::Backend(_))), "got {orphan:?}");
    }

    #[tokio::test]
    async fn transition_happens_once() {
        let pool = setup().await;
        insert_request(&pool, "REQ-1").await;
        let repo = SqlStepRepository::new(pool);
        let step_id = StepId("STEP-1".to_string());
        repo.create(&sample_step("STEP-1", "REQ-1", 1, "tok-1")).await.expect("create");

        let decided = repo
            .transition_if_pending(&step_id, ApprovalStatus::Rejected, Some("over budget"), Utc::now())
            .await
            .expect("transition")
            .expect("was pending");
        assert_eq!(decided.status, ApprovalStatus::Rejected);
        assert_eq!(decided.comment.as_deref(), Some("over budget"));
        assert!(decided.acted_at.is_some());

        let second = repo
            .transition_if_pending(&step_id, ApprovalStatus::Approved, None, Utc::now())
            .await
            .expect("transition");
        assert!(second.is_none());

        let stored = repo.find_by_id(&step_id).await.expect("find").expect("present");
        assert_eq!(stored.status, ApprovalStatus::Rejected);
    }
}
