//! Collaborators the routing engine drives. Stores must make the `*_if_pending` updates
//! atomic: concurrent callers race on them and exactly one may win.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStatus, ApprovalStep, StepId};
use crate::domain::level::ApprovalLevelConfig;
use crate::domain::request::{ApprovalRequest, ArtifactRef, RequestId, RequestUpdate};
use crate::errors::{SideEffectError, StoreError};

#[async_trait]
pub trait LevelConfigStore: Send + Sync {
    /// Active levels, ascending by level.
    async fn active_levels(&self) -> Result<Vec<ApprovalLevelConfig>, StoreError>;
    async fn all_levels(&self) -> Result<Vec<ApprovalLevelConfig>, StoreError>;
    async fn upsert_level(&self, config: &ApprovalLevelConfig) -> Result<(), StoreError>;
}

#[async_trait]
pub trait RequestStore: Send + Sync {
    async fn get_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError>;
    async fn create(&self, request: &ApprovalRequest) -> Result<(), StoreError>;
    /// Applies `update` only while the request is pending. `false` means nothing changed.
    async fn update_if_pending(
        &self,
        id: &RequestId,
        update: &RequestUpdate,
    ) -> Result<bool, StoreError>;
}

#[async_trait]
pub trait StepStore: Send + Sync {
    async fn create(&self, step: &ApprovalStep) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: &StepId) -> Result<Option<ApprovalStep>, StoreError>;
    /// Ascending by level.
    async fn list_for_request(&self, id: &RequestId) -> Result<Vec<ApprovalStep>, StoreError>;
    async fn find_by_token(&self, token: &str) -> Result<Option<ApprovalStep>, StoreError>;
    /// Moves a pending step to `status`. `None` means the step was not pending (or absent).
    async fn transition_if_pending(
        &self,
        id: &StepId,
        status: ApprovalStatus,
        comment: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> Result<Option<ApprovalStep>, StoreError>;
}

/// A decided level, as shown to the submitter and later approvers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepSummary {
    pub level: u32,
    pub level_name: Option<String>,
    pub approver_email: String,
    pub status: ApprovalStatus,
    pub comment: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequestNotice {
    pub request_id: RequestId,
    pub title: String,
    pub total_amount: Decimal,
    pub submitted_by: String,
    pub approver_email: String,
    pub level: u32,
    pub level_name: String,
    pub max_level: u32,
    pub approve_url: String,
    pub reject_url: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceNotice {
    /// Sent to the next approver; `submitted_by` also gets a progress notice from it.
    pub request: ApprovalRequestNotice,
    pub previous_approvals: Vec<StepSummary>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FinalizedNotice {
    pub request_id: RequestId,
    pub title: String,
    pub total_amount: Decimal,
    pub submitted_by: String,
    pub approved_by: Option<String>,
    pub comment: Option<String>,
    pub timeline: Vec<StepSummary>,
    pub artifacts_relocated: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RejectedNotice {
    pub request_id: RequestId,
    pub title: String,
    pub total_amount: Decimal,
    pub submitted_by: String,
    pub rejected_by: Option<String>,
    pub level: Option<u32>,
    pub level_name: Option<String>,
    pub reason: Option<String>,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_approval_request(&self, notice: &ApprovalRequestNotice)
        -> Result<(), SideEffectError>;
    async fn send_advance_notice(&self, notice: &AdvanceNotice) -> Result<(), SideEffectError>;
    async fn send_finalized_notice(&self, notice: &FinalizedNotice)
        -> Result<(), SideEffectError>;
    async fn send_rejected_notice(&self, notice: &RejectedNotice) -> Result<(), SideEffectError>;
}

#[async_trait]
pub trait ArtifactMover: Send + Sync {
    async fn move_to_approved_location(
        &self,
        artifacts: &[ArtifactRef],
        destination: &str,
    ) -> Result<(), SideEffectError>;
}
