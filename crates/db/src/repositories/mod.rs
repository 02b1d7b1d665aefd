use chrono::{DateTime, Utc};
use thiserror::Error;

use ladder_core::errors::StoreError;

pub mod level_config;
pub mod request;
pub mod step;

pub use level_config::SqlLevelConfigRepository;
pub use request::SqlRequestRepository;
pub use step::SqlStepRepository;

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
}

impl RepositoryError {
    fn is_unique_violation(&self) -> bool {
        match self {
            Self::Database(sqlx::Error::Database(db)) => db.is_unique_violation(),
            _ => false,
        }
    }
}

impl From<RepositoryError> for StoreError {
    fn from(value: RepositoryError) -> Self {
        if value.is_unique_violation() {
            return StoreError::Conflict(value.to_string());
        }
        match value {
            RepositoryError::Decode(message) => StoreError::Decode(message),
            RepositoryError::Database(error) => StoreError::Backend(error.to_string()),
        }
    }
}

fn decode_err(e: impl std::fmt::Display) -> RepositoryError {
    RepositoryError::Decode(e.to_string())
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("timestamp `{raw}`: {e}")))
}

fn parse_optional_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn level_from_db(raw: i64) -> Result<u32, RepositoryError> {
    u32::try_from(raw).map_err(|_| RepositoryError::Decode(format!("level `{raw}` out of range")))
}

#[cfg(test)]
mod tests {
    use ladder_core::errors::StoreError;

    use super::{parse_timestamp, RepositoryError};

    #[test]
    fn decode_failures_surface_as_store_decode_errors() {
        let error: StoreError = RepositoryError::Decode("bad status".to_string()).into();
        assert_eq!(error, StoreError::Decode("bad status".to_string()));
    }

    #[test]
    fn malformed_timestamps_are_rejected_rather_than_replaced() {
        assert!(parse_timestamp("yesterday").is_err());
        let parsed = parse_timestamp("2026-03-01T09:30:00+00:00").expect("parse");
        assert_eq!(parsed.to_rfc3339(), "2026-03-01T09:30:00+00:00");
    }
}
