pub mod engine;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::approval::{ApprovalStatus, StepId};
use crate::domain::request::{ApprovalRequest, RequestId, RoutingState};
use crate::errors::{ActionReply, RoutingError};
use crate::ports::StepSummary;

pub use engine::RoutingEngine;

/// What the caller needs to notify the first approver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitializedApproval {
    pub request_id: RequestId,
    pub step_id: StepId,
    pub approver_email: String,
    pub token: String,
    pub approve_url: String,
    pub reject_url: String,
    pub level: u32,
    pub level_name: String,
    pub max_level: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub request: ApprovalRequest,
    pub approval: InitializedApproval,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ActionOutcome {
    Advanced { next_level: u32, next_level_name: String, next_approver: String },
    Finalized { status: ApprovalStatus },
}

impl ActionOutcome {
    pub fn is_finalized(&self) -> bool {
        matches!(self, Self::Finalized { .. })
    }

    pub fn reply(&self) -> ActionReply {
        match self {
            Self::Advanced { .. } => ActionReply::SuccessAdvance,
            Self::Finalized { .. } => ActionReply::SuccessFinal,
        }
    }
}

/// Flat answer for link handlers. `error` is already safe to show the approver.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResponse {
    pub success: bool,
    pub is_finalized: bool,
    pub next_level: Option<u32>,
    pub next_level_name: Option<String>,
    pub error: Option<String>,
    pub reply: ActionReply,
    pub message: String,
}

impl ActionResponse {
    pub fn from_result(result: &Result<ActionOutcome, RoutingError>) -> Self {
        match result {
            Ok(outcome) => {
                let reply = outcome.reply();
                let (next_level, next_level_name) = match outcome {
                    ActionOutcome::Advanced { next_level, next_level_name, .. } => {
                        (Some(*next_level), Some(next_level_name.clone()))
                    }
                    ActionOutcome::Finalized { .. } => (None, None),
                };
                Self {
                    success: true,
                    is_finalized: outcome.is_finalized(),
                    next_level,
                    next_level_name,
                    error: None,
                    reply,
                    message: reply.user_message().to_string(),
                }
            }
            Err(error) => {
                let reply = ActionReply::from_error(error);
                Self {
                    success: false,
                    is_finalized: false,
                    next_level: None,
                    next_level_name: None,
                    error: Some(reply.user_message().to_string()),
                    reply,
                    message: reply.user_message().to_string(),
                }
            }
        }
    }
}

/// Read-only view behind a link: where the request stands and who has decided.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStatusView {
    pub request_id: RequestId,
    pub title: String,
    pub total_amount: Decimal,
    pub submitted_by: String,
    pub status: ApprovalStatus,
    pub routing_state: RoutingState,
    pub current_level: Option<u32>,
    pub max_level: Option<u32>,
    pub token_level: u32,
    pub token_step_status: Option<ApprovalStatus>,
    pub can_act: bool,
    pub approval_comment: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
    pub timeline: Vec<StepSummary>,
}

pub fn approval_links(public_base_url: &str, token: &str) -> (String, String) {
    let base = public_base_url.trim_end_matches('/');
    (
        format!("{base}/approve?token={token}&action=approve"),
        format!("{base}/approve?token={token}&action=reject"),
    )
}

#[cfg(test)]
mod tests {
    use super::{approval_links, ActionOutcome, ActionResponse};
    use crate::domain::approval::ApprovalStatus;
    use crate::errors::{ActionReply, RoutingError};

    #[test]
    fn links_carry_the_token_and_an_action_hint() {
        let (approve, reject) = approval_links("https://po.example.com/", "dG9rZW4");
        assert_eq!(approve, "https://po.example.com/approve?token=dG9rZW4&action=approve");
        assert_eq!(reject, "https://po.example.com/approve?token=dG9rZW4&action=reject");
    }

    #[test]
    fn advance_response_names_the_next_level() {
        let response = ActionResponse::from_result(&Ok(ActionOutcome::Advanced {
            next_level: 2,
            next_level_name: "Finance".to_string(),
            next_approver: "cfo@example.com".to_string(),
        }));

        assert!(response.success);
        assert!(!response.is_finalized);
        assert_eq!(response.next_level, Some(2));
        assert_eq!(response.next_level_name.as_deref(), Some("Finance"));
        assert_eq!(response.reply, ActionReply::SuccessAdvance);
    }

    #[test]
    fn failure_response_never_exposes_internal_text() {
        let response = ActionResponse::from_result(&Err(RoutingError::StepAlreadyActed));
        assert!(!response.success);
        assert_eq!(response.reply, ActionReply::AlreadyProcessed);
        assert_eq!(response.error.as_deref(), Some(ActionReply::AlreadyProcessed.user_message()));

        let final_response = ActionResponse::from_result(&Ok(ActionOutcome::Finalized {
            status: ApprovalStatus::Rejected,
        }));
        assert!(final_response.is_finalized);
    }
}
