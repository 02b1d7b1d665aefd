use std::str::FromStr;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::Row;

use ladder_core::domain::level::ApprovalLevelConfig;
use ladder_core::errors::StoreError;
use ladder_core::ports::LevelConfigStore;

use super::{decode_err, level_from_db, RepositoryError};
use crate::DbPool;

pub struct SqlLevelConfigRepository {
    pool: DbPool,
}

impl SqlLevelConfigRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    async fn fetch(&self, active_only: bool) -> Result<Vec<ApprovalLevelConfig>, RepositoryError> {
        let sql = if active_only {
            "SELECT level, level_name, max_amount, approver_email, is_active
             FROM approval_level_config WHERE is_active = 1 ORDER BY level ASC"
        } else {
            "SELECT level, level_name, max_amount, approver_email, is_active
             FROM approval_level_config ORDER BY level ASC"
        };
        let rows = sqlx::query(sql).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_level).collect()
    }
}

fn row_to_level(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalLevelConfig, RepositoryError> {
    let level: i64 = row.try_get("level").map_err(decode_err)?;
    let level_name: String = row.try_get("level_name").map_err(decode_err)?;
    let max_amount: Option<String> = row.try_get("max_amount").map_err(decode_err)?;
    let approver_email: String = row.try_get("approver_email").map_err(decode_err)?;
    let is_active: i64 = row.try_get("is_active").map_err(decode_err)?;

    let max_amount = max_amount
        .as_deref()
        .map(Decimal::from_str)
        .transpose()
        .map_err(|e| RepositoryError::Decode(format!("max_amount: {e}")))?;

    Ok(ApprovalLevelConfig {
        level: level_from_db(level)?,
        level_name,
        max_amount,
        approver_email,
        is_active: is_active != 0,
    })
}

#[async_trait]
impl LevelConfigStore for SqlLevelConfigRepository {
    async fn active_levels(&self) -> Result<Vec<ApprovalLevelConfig>, StoreError> {
        Ok(self.fetch(true).await?)
    }

    async fn all_levels(&self) -> Result<Vec<ApprovalLevelConfig>, StoreError> {
        Ok(self.fetch(false).await?)
    }

    async fn upsert_level(&self, config: &ApprovalLevelConfig) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO approval_level_config
                 (level, level_name, max_amount, approver_email, is_active, updated_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(level) DO UPDATE SET
                 level_name = excluded.level_name,
                 max_amount = excluded.max_amount,
                 approver_email = excluded.approver_email,
                 is_active = excluded.is_active,
                 updated_at = excluded.updated_at",
        )
        .bind(i64::from(config.level))
        .bind(&config.level_name)
        .bind(config.max_amount.map(|amount| amount.to_string()))
        .bind(&config.approver_email)
        .bind(i64::from(config.is_active))
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(RepositoryError::from)?;

        Ok(())
    }
}
