use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalStatus;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RequestId(pub String);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("REQ-{}", uuid::Uuid::new_v4().simple()))
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Reference to a document held by an external store, relocated on final approval.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRef {
    pub store_id: String,
    pub file_id: String,
    pub file_name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    pub id: RequestId,
    pub title: String,
    pub submitted_by: String,
    pub total_amount: Decimal,
    pub current_level: Option<u32>,
    pub max_level: Option<u32>,
    pub sent_to: Option<String>,
    pub status: ApprovalStatus,
    pub approval_comment: Option<String>,
    pub artifacts: Vec<ArtifactRef>,
    pub approved_destination: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Where a request sits on its approval ladder.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoutingState {
    Unrouted,
    AwaitingLevel(u32),
    Approved,
    Rejected,
}

impl ApprovalRequest {
    pub fn new(submission: NewApprovalRequest, now: DateTime<Utc>) -> Self {
        Self {
            id: submission.id,
            title: submission.title,
            submitted_by: submission.submitted_by,
            total_amount: submission.total_amount,
            current_level: None,
            max_level: None,
            sent_to: None,
            status: ApprovalStatus::Pending,
            approval_comment: None,
            artifacts: submission.artifacts,
            approved_destination: submission.approved_destination,
            approved_at: None,
            rejected_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn routing_state(&self) -> RoutingState {
        match (self.status, self.current_level) {
            (ApprovalStatus::Approved, _) => RoutingState::Approved,
            (ApprovalStatus::Rejected, _) => RoutingState::Rejected,
            (ApprovalStatus::Pending, None) => RoutingState::Unrouted,
            (ApprovalStatus::Pending, Some(level)) => RoutingState::AwaitingLevel(level),
        }
    }

    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }

    pub fn wants_relocation(&self) -> bool {
        !self.artifacts.is_empty() && self.approved_destination.is_some()
    }

    /// Applies a partial update in place. Used by stores that keep whole records.
    pub fn apply(&mut self, update: &RequestUpdate) {
        if let Some(status) = update.status {
            self.status = status;
        }
        if let Some(level) = update.current_level {
            self.current_level = Some(level);
        }
        if let Some(level) = update.max_level {
            self.max_level = Some(level);
        }
        if let Some(sent_to) = &update.sent_to {
            self.sent_to = Some(sent_to.clone());
        }
        if let Some(comment) = &update.approval_comment {
            self.approval_comment = Some(comment.clone());
        }
        if let Some(at) = update.approved_at {
            self.approved_at = Some(at);
        }
        if let Some(at) = update.rejected_at {
            self.rejected_at = Some(at);
        }
        self.updated_at = update.updated_at;
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewApprovalRequest {
    pub id: RequestId,
    pub title: String,
    pub submitted_by: String,
    pub total_amount: Decimal,
    #[serde(default)]
    pub artifacts: Vec<ArtifactRef>,
    #[serde(default)]
    pub approved_destination: Option<String>,
}

/// Partial update applied only while the request is still pending.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestUpdate {
    pub status: Option<ApprovalStatus>,
    pub current_level: Option<u32>,
    pub max_level: Option<u32>,
    pub sent_to: Option<String>,
    pub approval_comment: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl RequestUpdate {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            status: None,
            current_level: None,
            max_level: None,
            sent_to: None,
            approval_comment: None,
            approved_at: None,
            rejected_at: None,
            updated_at: now,
        }
    }

    pub fn routed(now: DateTime<Utc>, level: u32, max_level: u32, approver: &str) -> Self {
        Self {
            current_level: Some(level),
            max_level: Some(max_level),
            sent_to: Some(approver.to_string()),
            ..Self::at(now)
        }
    }

    pub fn advanced(now: DateTime<Utc>, level: u32, approver: &str) -> Self {
        Self { current_level: Some(level), sent_to: Some(approver.to_string()), ..Self::at(now) }
    }

    pub fn approved(now: DateTime<Utc>, comment: Option<&str>) -> Self {
        Self {
            status: Some(ApprovalStatus::Approved),
            approval_comment: comment.map(str::to_string),
            approved_at: Some(now),
            ..Self::at(now)
        }
    }

    pub fn rejected(now: DateTime<Utc>, comment: Option<&str>) -> Self {
        Self {
            status: Some(ApprovalStatus::Rejected),
            approval_comment: comment.map(str::to_string),
            rejected_at: Some(now),
            ..Self::at(now)
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use rust_decimal::Decimal;

    use super::{ApprovalRequest, NewApprovalRequest, RequestId, RequestUpdate, RoutingState};

    fn request() -> ApprovalRequest {
        ApprovalRequest::new(
            NewApprovalRequest {
                id: RequestId("REQ-1".to_string()),
                title: "PO-2026-001.pdf".to_string(),
                submitted_by: "buyer@example.com".to_string(),
                total_amount: Decimal::new(5_000, 0),
                artifacts: Vec::new(),
                approved_destination: None,
            },
            Utc::now(),
        )
    }

    #[test]
    fn new_request_starts_unrouted_and_pending() {
        let request = request();
        assert_eq!(request.routing_state(), RoutingState::Unrouted);
        assert!(request.is_pending());
    }

    #[test]
    fn routing_update_moves_request_onto_first_level() {
        let mut request = request();
        request.apply(&RequestUpdate::routed(Utc::now(), 1, 2, "lead@example.com"));

        assert_eq!(request.routing_state(), RoutingState::AwaitingLevel(1));
        assert_eq!(request.max_level, Some(2));
        assert_eq!(request.sent_to.as_deref(), Some("lead@example.com"));
    }

    #[test]
    fn rejection_keeps_the_level_it_stopped_at() {
        let mut request = request();
        request.apply(&RequestUpdate::routed(Utc::now(), 2, 3, "mgr@example.com"));
        request.apply(&RequestUpdate::rejected(Utc::now(), Some("missing quote")));

        assert_eq!(request.routing_state(), RoutingState::Rejected);
        assert_eq!(request.current_level, Some(2));
        assert_eq!(request.approval_comment.as_deref(), Some("missing quote"));
        assert!(request.rejected_at.is_some());
    }
}
