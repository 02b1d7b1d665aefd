use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::request::RequestId;

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepId(pub String);

impl StepId {
    pub fn generate() -> Self {
        Self(format!("STEP-{}", uuid::Uuid::new_v4().simple()))
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
}

impl ApprovalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// What an approver decided. Anything other than these two never reaches persistence.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ApprovalAction {
    Approve {
        #[serde(default)]
        comment: Option<String>,
    },
    Reject {
        #[serde(default)]
        comment: Option<String>,
    },
}

impl ApprovalAction {
    pub fn approve() -> Self {
        Self::Approve { comment: None }
    }

    pub fn reject(comment: impl Into<String>) -> Self {
        Self::Reject { comment: Some(comment.into()) }
    }

    /// Reads the `action` word of a link or form. Unknown words yield `None`.
    pub fn parse(action: &str, comment: Option<String>) -> Option<Self> {
        match action.trim().to_ascii_lowercase().as_str() {
            "approve" => Some(Self::Approve { comment }),
            "reject" => Some(Self::Reject { comment }),
            _ => None,
        }
    }

    pub fn comment(&self) -> Option<&str> {
        match self {
            Self::Approve { comment } | Self::Reject { comment } => {
                comment.as_deref().map(str::trim).filter(|value| !value.is_empty())
            }
        }
    }

    pub fn resulting_status(&self) -> ApprovalStatus {
        match self {
            Self::Approve { .. } => ApprovalStatus::Approved,
            Self::Reject { .. } => ApprovalStatus::Rejected,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Approve { .. } => "approve",
            Self::Reject { .. } => "reject",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub request_id: RequestId,
    pub level: u32,
    pub approver_email: String,
    pub status: ApprovalStatus,
    pub token: String,
    pub comment: Option<String>,
    pub acted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl ApprovalStep {
    pub fn is_pending(&self) -> bool {
        self.status == ApprovalStatus::Pending
    }
}
