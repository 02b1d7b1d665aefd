use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::policy::{LadderError, PolicyError};
use crate::token::TokenError;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("store backend failure: {0}")]
    Backend(String),
    #[error("stored record could not be decoded: {0}")]
    Decode(String),
    #[error("record already exists: {0}")]
    Conflict(String),
}

/// Failures of work that follows a recorded decision. Logged, never propagated.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SideEffectError {
    #[error("notification delivery failed: {0}")]
    NotificationDeliveryFailure(String),
    #[error("artifact move failed: {0}")]
    ArtifactMoveFailure(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum RoutingError {
    #[error("approval token is invalid")]
    InvalidToken,
    #[error("approval token has expired")]
    ExpiredToken,
    #[error("request has already been processed")]
    AlreadyProcessed,
    #[error("approval step has already been acted on")]
    StepAlreadyActed,
    #[error("no active approval levels are configured")]
    Unconfigured,
    #[error("request `{0}` not found")]
    RequestNotFound(String),
    #[error("approval step `{0}` not found")]
    StepNotFound(String),
    #[error("approval step `{step_id}` does not belong to request `{request_id}`")]
    StepRequestMismatch { step_id: String, request_id: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RoutingError {
    /// Store failures are the only ones worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Store(_))
    }

    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::InvalidToken
            | Self::ExpiredToken
            | Self::StepRequestMismatch { .. }
            | Self::InvalidRequest(_) => InterfaceError::BadRequest { message, correlation_id },
            Self::RequestNotFound(_) | Self::StepNotFound(_) => {
                InterfaceError::NotFound { message, correlation_id }
            }
            Self::AlreadyProcessed | Self::StepAlreadyActed => {
                InterfaceError::Conflict { message, correlation_id }
            }
            Self::Unconfigured => InterfaceError::Unprocessable { message, correlation_id },
            Self::Store(_) => InterfaceError::ServiceUnavailable { message, correlation_id },
        }
    }
}

impl From<PolicyError> for RoutingError {
    fn from(value: PolicyError) -> Self {
        match value {
            PolicyError::Unconfigured => Self::Unconfigured,
            PolicyError::NegativeTotal => Self::InvalidRequest(value.to_string()),
        }
    }
}

impl From<TokenError> for RoutingError {
    fn from(value: TokenError) -> Self {
        Self::InvalidRequest(value.to_string())
    }
}

impl LadderError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let message = self.to_string();
        match self {
            Self::Store(_) => InterfaceError::ServiceUnavailable { message, correlation_id },
            _ => InterfaceError::BadRequest { message, correlation_id },
        }
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("not found: {message}")]
    NotFound { message: String, correlation_id: String },
    #[error("conflict: {message}")]
    Conflict { message: String, correlation_id: String },
    #[error("unprocessable: {message}")]
    Unprocessable { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::NotFound { .. } => "The requested record does not exist.",
            Self::Conflict { .. } => "This request has already been processed.",
            Self::Unprocessable { .. } => {
                "Approval levels are not configured. Ask an administrator to set them up."
            }
            Self::ServiceUnavailable { .. } => {
                "The service is temporarily unavailable. Please retry shortly."
            }
        }
    }

    pub fn correlation_id(&self) -> &str {
        match self {
            Self::BadRequest { correlation_id, .. }
            | Self::NotFound { correlation_id, .. }
            | Self::Conflict { correlation_id, .. }
            | Self::Unprocessable { correlation_id, .. }
            | Self::ServiceUnavailable { correlation_id, .. } => correlation_id,
        }
    }
}

/// The one answer an approver gets back for clicking a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionReply {
    SuccessAdvance,
    SuccessFinal,
    AlreadyProcessed,
    InvalidLink,
    ExpiredLink,
    GenericError,
}

impl ActionReply {
    pub fn from_error(error: &RoutingError) -> Self {
        match error {
            RoutingError::AlreadyProcessed | RoutingError::StepAlreadyActed => {
                Self::AlreadyProcessed
            }
            RoutingError::InvalidToken
            | RoutingError::RequestNotFound(_)
            | RoutingError::StepNotFound(_)
            | RoutingError::StepRequestMismatch { .. } => Self::InvalidLink,
            RoutingError::ExpiredToken => Self::ExpiredLink,
            RoutingError::Unconfigured
            | RoutingError::InvalidRequest(_)
            | RoutingError::Store(_) => Self::GenericError,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::SuccessAdvance | Self::SuccessFinal)
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            Self::SuccessAdvance => {
                "Thank you. Your approval was recorded and sent on to the next approver."
            }
            Self::SuccessFinal => "Thank you. Your decision has been recorded.",
            Self::AlreadyProcessed => "This request has already been processed.",
            Self::InvalidLink => "This approval link is not valid.",
            Self::ExpiredLink => {
                "This approval link has expired. Ask the submitter to send the request again."
            }
            Self::GenericError => "Something went wrong while recording your decision. Please retry.",
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::errors::{ActionReply, InterfaceError, RoutingError, StoreError};
    use crate::policy::PolicyError;

    #[test]
    fn business_conditions_are_not_retryable() {
        assert!(!RoutingError::AlreadyProcessed.is_retryable());
        assert!(!RoutingError::StepAlreadyActed.is_retryable());
        assert!(RoutingError::Store(StoreError::Backend("locked".to_owned())).is_retryable());
    }

    #[test]
    fn every_routing_error_maps_to_one_reply() {
        let cases = [
            (RoutingError::InvalidToken, ActionReply::InvalidLink),
            (RoutingError::ExpiredToken, ActionReply::ExpiredLink),
            (RoutingError::AlreadyProcessed, ActionReply::AlreadyProcessed),
            (RoutingError::StepAlreadyActed, ActionReply::AlreadyProcessed),
            (RoutingError::StepNotFound("STEP-1".to_owned()), ActionReply::InvalidLink),
            (
                RoutingError::Store(StoreError::Backend("disk full".to_owned())),
                ActionReply::GenericError,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ActionReply::from_error(&error), expected, "{error}");
        }
    }

    #[test]
    fn expired_and_invalid_links_read_differently() {
        assert_ne!(
            ActionReply::InvalidLink.user_message(),
            ActionReply::ExpiredLink.user_message()
        );
        assert!(!ActionReply::GenericError.user_message().contains("disk"));
    }

    #[test]
    fn store_failure_maps_to_service_unavailable_with_correlation_id() {
        let interface = RoutingError::Store(StoreError::Backend("database lock timeout".to_owned()))
            .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(interface.correlation_id(), "req-3");
        assert_eq!(
            interface.user_message(),
            "The service is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn unconfigured_policy_refuses_submission() {
        let interface = RoutingError::from(PolicyError::Unconfigured).into_interface("req-4");
        assert!(matches!(interface, InterfaceError::Unprocessable { .. }));
    }
}
