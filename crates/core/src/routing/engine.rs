use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink};
use crate::domain::approval::{ApprovalAction, ApprovalStatus, ApprovalStep, StepId};
use crate::domain::level::ApprovalLevelConfig;
use crate::domain::request::{ApprovalRequest, NewApprovalRequest, RequestId, RequestUpdate};
use crate::errors::{RoutingError, SideEffectError, StoreError};
use crate::ledger::StepLedger;
use crate::policy::{LevelPolicy, PolicyError};
use crate::ports::{
    AdvanceNotice, ApprovalRequestNotice, ArtifactMover, FinalizedNotice, LevelConfigStore,
    Notifier, RejectedNotice, RequestStore, StepStore, StepSummary,
};
use crate::routing::{
    approval_links, ActionOutcome, ActionResponse, ApprovalStatusView, InitializedApproval,
    Submission,
};
use crate::token::{TokenCodec, TokenVerification};

/// Drives a request up its ladder one level at a time.
///
/// Holds no locks: every transition is decided by a conditional store update, so any number
/// of handlers may call into the same engine. Notices and artifact moves run after the
/// decision is stored, and their failures are logged and audited only.
#[derive(Clone)]
pub struct RoutingEngine {
    levels: Arc<dyn LevelConfigStore>,
    requests: Arc<dyn RequestStore>,
    ledger: StepLedger,
    notifier: Arc<dyn Notifier>,
    mover: Option<Arc<dyn ArtifactMover>>,
    audit: Arc<dyn AuditSink>,
    public_base_url: String,
}

impl RoutingEngine {
    pub fn new(
        levels: Arc<dyn LevelConfigStore>,
        requests: Arc<dyn RequestStore>,
        steps: Arc<dyn StepStore>,
        notifier: Arc<dyn Notifier>,
        codec: TokenCodec,
        public_base_url: impl Into<String>,
    ) -> Self {
        Self {
            levels,
            requests,
            ledger: StepLedger::new(steps, codec),
            notifier,
            mover: None,
            audit: Arc::new(TracingAuditSink),
            public_base_url: public_base_url.into(),
        }
    }

    pub fn with_artifact_mover(mut self, mover: Arc<dyn ArtifactMover>) -> Self {
        self.mover = Some(mover);
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        self.audit.clone()
    }

    pub fn ledger(&self) -> &StepLedger {
        &self.ledger
    }

    /// Stores a new request and sends it to its first approver. Nothing is stored when no
    /// ladder is configured.
    pub async fn submit(
        &self,
        submission: NewApprovalRequest,
        audit: &AuditContext,
    ) -> Result<Submission, RoutingError> {
        validate_submission(&submission)?;

        let levels = self.levels.active_levels().await?;
        LevelPolicy::resolve(submission.total_amount, &levels)?;

        let request = ApprovalRequest::new(submission, Utc::now());
        self.requests.create(&request).await.map_err(|error| match error {
            StoreError::Conflict(_) => {
                RoutingError::InvalidRequest(format!("request `{}` already exists", request.id))
            }
            other => RoutingError::Store(other),
        })?;
        self.emit(
            audit,
            &request.id,
            "approval.submitted",
            AuditCategory::Submission,
            AuditOutcome::Success,
            vec![("total_amount", request.total_amount.to_string())],
        );

        let approval = self
            .initialize_approval(&request.id, request.total_amount, audit)
            .await?
            .ok_or(RoutingError::Unconfigured)?;

        let notice = ApprovalRequestNotice {
            request_id: request.id.clone(),
            title: request.title.clone(),
            total_amount: request.total_amount,
            submitted_by: request.submitted_by.clone(),
            approver_email: approval.approver_email.clone(),
            level: approval.level,
            level_name: approval.level_name.clone(),
            max_level: approval.max_level,
            approve_url: approval.approve_url.clone(),
            reject_url: approval.reject_url.clone(),
        };
        let sent = self.notifier.send_approval_request(&notice).await;
        self.report_side_effect(audit, &request.id, sent);

        let request = self
            .requests
            .get_by_id(&request.id)
            .await?
            .ok_or_else(|| RoutingError::RequestNotFound(request.id.0.clone()))?;

        Ok(Submission { request, approval })
    }

    /// Fixes the request's depth and opens its level-1 step. `None` when no levels are
    /// active; the caller decides whether to refuse or fall back.
    pub async fn initialize_approval(
        &self,
        request_id: &RequestId,
        total: Decimal,
        audit: &AuditContext,
    ) -> Result<Option<InitializedApproval>, RoutingError> {
        let levels = self.levels.active_levels().await?;
        let policy = match LevelPolicy::resolve(total, &levels) {
            Ok(policy) => policy,
            Err(PolicyError::Unconfigured) => {
                tracing::warn!(
                    event_name = "approval.unconfigured",
                    correlation_id = %audit.correlation_id,
                    request_id = %request_id,
                    "no active approval levels; request not routed"
                );
                return Ok(None);
            }
            Err(error) => return Err(error.into()),
        };
        let Some(first) = policy.first().cloned() else {
            return Ok(None);
        };
        if first.level != 1 {
            // Depth is clamped to the rung count, so a ladder starting above 1 stops short.
            tracing::warn!(
                event_name = "approval.ladder_offset",
                correlation_id = %audit.correlation_id,
                request_id = %request_id,
                first_level = first.level,
                max_level = policy.max_level,
                "active ladder does not start at level 1"
            );
        }

        let request = self.load_request(request_id).await?;
        if !request.is_pending() || request.current_level.is_some() {
            return Err(RoutingError::AlreadyProcessed);
        }

        let now = Utc::now();
        let step = self
            .ledger
            .create(request_id, first.level, &first.approver_email, now)
            .await
            .map_err(already_processed_on_conflict)?;

        let routed = RequestUpdate::routed(now, first.level, policy.max_level, &first.approver_email);
        if !self.requests.update_if_pending(request_id, &routed).await? {
            return Err(RoutingError::AlreadyProcessed);
        }

        tracing::info!(
            event_name = "approval.initialized",
            correlation_id = %audit.correlation_id,
            request_id = %request_id,
            max_level = policy.max_level,
            approver = %first.approver_email,
            "approval routing initialized"
        );
        self.emit(
            audit,
            request_id,
            "approval.initialized",
            AuditCategory::Routing,
            AuditOutcome::Success,
            vec![
                ("max_level", policy.max_level.to_string()),
                ("approver", first.approver_email.clone()),
            ],
        );

        let (approve_url, reject_url) = approval_links(&self.public_base_url, &step.token);
        Ok(Some(InitializedApproval {
            request_id: request_id.clone(),
            step_id: step.id,
            approver_email: first.approver_email,
            token: step.token,
            approve_url,
            reject_url,
            level: first.level,
            level_name: first.level_name,
            max_level: policy.max_level,
        }))
    }

    /// Records `action` on one step of a request and moves the request accordingly.
    pub async fn act(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        action: ApprovalAction,
        audit: &AuditContext,
    ) -> Result<ActionOutcome, RoutingError> {
        let request = self.load_request(request_id).await?;
        if !request.is_pending() {
            return Err(RoutingError::AlreadyProcessed);
        }

        let step = self
            .ledger
            .find_by_id(step_id)
            .await?
            .ok_or_else(|| RoutingError::StepNotFound(step_id.0.clone()))?;
        if &step.request_id != request_id {
            return Err(RoutingError::StepRequestMismatch {
                step_id: step_id.0.clone(),
                request_id: request_id.0.clone(),
            });
        }

        let now = Utc::now();
        let decided = self.ledger.transition(step_id, &action, now).await?;

        tracing::info!(
            event_name = "approval.step.decided",
            correlation_id = %audit.correlation_id,
            request_id = %request_id,
            step_id = %step_id.0,
            level = decided.level,
            action = action.as_str(),
            "approval step decided"
        );
        self.emit(
            audit,
            request_id,
            match action {
                ApprovalAction::Approve { .. } => "approval.step.approved",
                ApprovalAction::Reject { .. } => "approval.step.rejected",
            },
            AuditCategory::Decision,
            AuditOutcome::Success,
            vec![("level", decided.level.to_string()), ("approver", decided.approver_email.clone())],
        );

        match action {
            ApprovalAction::Reject { .. } => {
                self.reject(&request, Some(&decided), action.comment(), now, audit).await
            }
            ApprovalAction::Approve { .. } => {
                let max_level = request.max_level.unwrap_or(decided.level);
                if decided.level < max_level {
                    self.advance(&request, &decided, max_level, now, audit).await
                } else {
                    self.finalize(&request, Some(&decided), action.comment(), now, audit).await
                }
            }
        }
    }

    pub async fn process_approval_action(
        &self,
        request_id: &RequestId,
        step_id: &StepId,
        action: ApprovalAction,
        audit: &AuditContext,
    ) -> ActionResponse {
        let result = self.act(request_id, step_id, action, audit).await;
        self.log_refusal(audit, request_id, &result);
        ActionResponse::from_result(&result)
    }

    /// Single-recipient requests predate steps: the decision lands on the request itself.
    pub async fn process_legacy_action(
        &self,
        request_id: &RequestId,
        action: ApprovalAction,
        audit: &AuditContext,
    ) -> Result<ActionOutcome, RoutingError> {
        let request = self.load_request(request_id).await?;
        if !request.is_pending() {
            return Err(RoutingError::AlreadyProcessed);
        }

        let now = Utc::now();
        tracing::info!(
            event_name = "approval.legacy.decided",
            correlation_id = %audit.correlation_id,
            request_id = %request_id,
            action = action.as_str(),
            "single-recipient decision"
        );
        match action {
            ApprovalAction::Reject { .. } => {
                self.reject(&request, None, action.comment(), now, audit).await
            }
            ApprovalAction::Approve { .. } => {
                self.finalize(&request, None, action.comment(), now, audit).await
            }
        }
    }

    pub fn verify_approval_token(&self, token: &str) -> TokenVerification {
        self.ledger.codec().verify(token)
    }

    /// Full link flow: check the token, find its step, then act. Tokens with no step are
    /// honoured only for requests that were never routed through levels.
    pub async fn act_on_token(
        &self,
        token: &str,
        action: ApprovalAction,
        audit: &AuditContext,
    ) -> Result<ActionOutcome, RoutingError> {
        let request_id = verified_request_id(&self.verify_approval_token(token))?;

        match self.ledger.find_by_token(token).await? {
            Some(step) if step.request_id == request_id => {
                self.act(&request_id, &step.id, action, audit).await
            }
            Some(_) => Err(RoutingError::InvalidToken),
            None => {
                let request = self.load_request(&request_id).await?;
                if request.max_level.is_some() {
                    return Err(RoutingError::InvalidToken);
                }
                self.process_legacy_action(&request_id, action, audit).await
            }
        }
    }

    pub async fn respond_to_token(
        &self,
        token: &str,
        action: ApprovalAction,
        audit: &AuditContext,
    ) -> ActionResponse {
        let result = self.act_on_token(token, action, audit).await;
        let request_id = self
            .verify_approval_token(token)
            .request_id
            .unwrap_or_else(|| RequestId(String::new()));
        self.log_refusal(audit, &request_id, &result);
        ActionResponse::from_result(&result)
    }

    pub async fn approval_status(&self, token: &str) -> Result<ApprovalStatusView, RoutingError> {
        let verification = self.verify_approval_token(token);
        let request_id = verified_request_id(&verification)?;
        let request = self.load_request(&request_id).await?;

        let token_step = self.ledger.find_by_token(token).await?;
        if token_step.as_ref().is_some_and(|step| step.request_id != request_id) {
            return Err(RoutingError::InvalidToken);
        }
        let timeline = self.timeline(&request_id).await?;

        let token_step_status = token_step.as_ref().map(|step| step.status);
        let can_act = request.is_pending()
            && match &token_step {
                Some(step) => step.is_pending(),
                None => request.max_level.is_none(),
            };

        Ok(ApprovalStatusView {
            request_id: request.id.clone(),
            title: request.title.clone(),
            total_amount: request.total_amount,
            submitted_by: request.submitted_by.clone(),
            status: request.status,
            routing_state: request.routing_state(),
            current_level: request.current_level,
            max_level: request.max_level,
            token_level: verification.level.unwrap_or(1),
            token_step_status,
            can_act,
            approval_comment: request.approval_comment.clone(),
            approved_at: request.approved_at,
            rejected_at: request.rejected_at,
            timeline,
        })
    }

    async fn advance(
        &self,
        request: &ApprovalRequest,
        decided: &ApprovalStep,
        max_level: u32,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<ActionOutcome, RoutingError> {
        let next_level = decided.level + 1;
        let levels = self.levels.active_levels().await?;
        let Some(next) = levels.into_iter().find(|config| config.level == next_level) else {
            tracing::warn!(
                event_name = "approval.next_level_missing",
                correlation_id = %audit.correlation_id,
                request_id = %request.id,
                next_level,
                max_level,
                "next approval level is not configured; finalizing"
            );
            return self.finalize(request, Some(decided), decided.comment.as_deref(), now, audit).await;
        };

        let step = self
            .ledger
            .create(&request.id, next.level, &next.approver_email, now)
            .await
            .map_err(already_processed_on_conflict)?;
        let update = RequestUpdate::advanced(now, next.level, &next.approver_email);
        if !self.requests.update_if_pending(&request.id, &update).await? {
            return Err(RoutingError::AlreadyProcessed);
        }

        tracing::info!(
            event_name = "approval.advanced",
            correlation_id = %audit.correlation_id,
            request_id = %request.id,
            from_level = decided.level,
            to_level = next.level,
            approver = %next.approver_email,
            "request advanced to next approval level"
        );
        self.emit(
            audit,
            &request.id,
            "approval.advanced",
            AuditCategory::Routing,
            AuditOutcome::Success,
            vec![
                ("from_level", decided.level.to_string()),
                ("to_level", next.level.to_string()),
                ("approver", next.approver_email.clone()),
            ],
        );

        let previous_approvals = match self.timeline(&request.id).await {
            Ok(timeline) => timeline
                .into_iter()
                .filter(|summary| summary.status == ApprovalStatus::Approved)
                .collect(),
            Err(error) => {
                tracing::warn!(
                    event_name = "approval.timeline_unavailable",
                    correlation_id = %audit.correlation_id,
                    request_id = %request.id,
                    error = %error,
                    "could not load approval history for notice"
                );
                Vec::new()
            }
        };
        let (approve_url, reject_url) = approval_links(&self.public_base_url, &step.token);
        let notice = AdvanceNotice {
            request: ApprovalRequestNotice {
                request_id: request.id.clone(),
                title: request.title.clone(),
                total_amount: request.total_amount,
                submitted_by: request.submitted_by.clone(),
                approver_email: next.approver_email.clone(),
                level: next.level,
                level_name: next.level_name.clone(),
                max_level,
                approve_url,
                reject_url,
            },
            previous_approvals,
        };
        let sent = self.notifier.send_advance_notice(&notice).await;
        self.report_side_effect(audit, &request.id, sent);

        Ok(ActionOutcome::Advanced {
            next_level: next.level,
            next_level_name: next.level_name,
            next_approver: next.approver_email,
        })
    }

    async fn finalize(
        &self,
        request: &ApprovalRequest,
        decided: Option<&ApprovalStep>,
        comment: Option<&str>,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<ActionOutcome, RoutingError> {
        if !self.requests.update_if_pending(&request.id, &RequestUpdate::approved(now, comment)).await? {
            return Err(RoutingError::AlreadyProcessed);
        }

        tracing::info!(
            event_name = "approval.finalized",
            correlation_id = %audit.correlation_id,
            request_id = %request.id,
            level = decided.map(|step| step.level),
            "request approved"
        );
        self.emit(
            audit,
            &request.id,
            "approval.finalized",
            AuditCategory::Decision,
            AuditOutcome::Success,
            vec![("level", decided.map(|step| step.level.to_string()).unwrap_or_default())],
        );

        let mut artifacts_relocated = false;
        if let (Some(mover), Some(destination)) = (&self.mover, &request.approved_destination) {
            if request.wants_relocation() {
                let moved = mover.move_to_approved_location(&request.artifacts, destination).await;
                artifacts_relocated = moved.is_ok();
                self.report_side_effect(audit, &request.id, moved);
            }
        }

        let timeline = self.timeline(&request.id).await.unwrap_or_default();
        let notice = FinalizedNotice {
            request_id: request.id.clone(),
            title: request.title.clone(),
            total_amount: request.total_amount,
            submitted_by: request.submitted_by.clone(),
            approved_by: decided
                .map(|step| step.approver_email.clone())
                .or_else(|| request.sent_to.clone()),
            comment: comment.map(str::to_string),
            timeline,
            artifacts_relocated,
        };
        let sent = self.notifier.send_finalized_notice(&notice).await;
        self.report_side_effect(audit, &request.id, sent);

        Ok(ActionOutcome::Finalized { status: ApprovalStatus::Approved })
    }

    async fn reject(
        &self,
        request: &ApprovalRequest,
        decided: Option<&ApprovalStep>,
        comment: Option<&str>,
        now: DateTime<Utc>,
        audit: &AuditContext,
    ) -> Result<ActionOutcome, RoutingError> {
        if !self.requests.update_if_pending(&request.id, &RequestUpdate::rejected(now, comment)).await? {
            return Err(RoutingError::AlreadyProcessed);
        }

        let level = decided.map(|step| step.level);
        tracing::info!(
            event_name = "approval.rejected",
            correlation_id = %audit.correlation_id,
            request_id = %request.id,
            level,
            "request rejected"
        );
        self.emit(
            audit,
            &request.id,
            "approval.rejected",
            AuditCategory::Decision,
            AuditOutcome::Rejected,
            vec![("level", level.map(|level| level.to_string()).unwrap_or_default())],
        );

        let level_name = match level {
            Some(level) => self.level_names().await.get(&level).cloned(),
            None => None,
        };
        let notice = RejectedNotice {
            request_id: request.id.clone(),
            title: request.title.clone(),
            total_amount: request.total_amount,
            submitted_by: request.submitted_by.clone(),
            rejected_by: decided
                .map(|step| step.approver_email.clone())
                .or_else(|| request.sent_to.clone()),
            level,
            level_name,
            reason: comment.map(str::to_string),
        };
        let sent = self.notifier.send_rejected_notice(&notice).await;
        self.report_side_effect(audit, &request.id, sent);

        Ok(ActionOutcome::Finalized { status: ApprovalStatus::Rejected })
    }

    async fn load_request(&self, request_id: &RequestId) -> Result<ApprovalRequest, RoutingError> {
        self.requests
            .get_by_id(request_id)
            .await?
            .ok_or_else(|| RoutingError::RequestNotFound(request_id.0.clone()))
    }

    async fn timeline(&self, request_id: &RequestId) -> Result<Vec<StepSummary>, RoutingError> {
        let names = self.level_names().await;
        let steps = self.ledger.list_for_request(request_id).await?;
        Ok(steps
            .into_iter()
            .map(|step| StepSummary {
                level_name: names.get(&step.level).cloned(),
                level: step.level,
                approver_email: step.approver_email,
                status: step.status,
                comment: step.comment,
                acted_at: step.acted_at,
            })
            .collect())
    }

    /// Names for display only; a lookup failure just leaves them out.
    async fn level_names(&self) -> HashMap<u32, String> {
        self.levels
            .all_levels()
            .await
            .map(|levels| {
                levels
                    .into_iter()
                    .map(|ApprovalLevelConfig { level, level_name, .. }| (level, level_name))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn report_side_effect(
        &self,
        audit: &AuditContext,
        request_id: &RequestId,
        result: Result<(), SideEffectError>,
    ) {
        let Err(error) = result else {
            return;
        };
        let event_type = match &error {
            SideEffectError::NotificationDeliveryFailure(_) => "approval.notification_failed",
            SideEffectError::ArtifactMoveFailure(_) => "approval.artifact_move_failed",
        };
        tracing::warn!(
            event_name = event_type,
            correlation_id = %audit.correlation_id,
            request_id = %request_id,
            error = %error,
            "side effect failed after decision was recorded"
        );
        self.emit(
            audit,
            request_id,
            event_type,
            AuditCategory::SideEffect,
            AuditOutcome::Failed,
            vec![("error", error.to_string())],
        );
    }

    fn log_refusal(
        &self,
        audit: &AuditContext,
        request_id: &RequestId,
        result: &Result<ActionOutcome, RoutingError>,
    ) {
        let Err(error) = result else {
            return;
        };
        if error.is_retryable() {
            tracing::error!(
                event_name = "approval.action_failed",
                correlation_id = %audit.correlation_id,
                request_id = %request_id,
                error = %error,
                "approval action failed"
            );
        } else {
            tracing::info!(
                event_name = "approval.action_refused",
                correlation_id = %audit.correlation_id,
                request_id = %request_id,
                reason = %error,
                "approval action refused"
            );
        }
    }

    fn emit(
        &self,
        audit: &AuditContext,
        request_id: &RequestId,
        event_type: &str,
        category: AuditCategory,
        outcome: AuditOutcome,
        metadata: Vec<(&str, String)>,
    ) {
        let event = metadata.into_iter().fold(
            AuditEvent::new(
                Some(request_id.clone()),
                audit.correlation_id.clone(),
                event_type,
                category,
                audit.actor.clone(),
                outcome,
            ),
            |event, (key, value)| event.with_metadata(key, value),
        );
        self.audit.emit(event);
    }
}

fn verified_request_id(verification: &TokenVerification) -> Result<RequestId, RoutingError> {
    if verification.expired {
        return Err(RoutingError::ExpiredToken);
    }
    match (&verification.request_id, verification.valid) {
        (Some(request_id), true) => Ok(request_id.clone()),
        _ => Err(RoutingError::InvalidToken),
    }
}

fn already_processed_on_conflict(error: RoutingError) -> RoutingError {
    match error {
        RoutingError::Store(StoreError::Conflict(_)) => RoutingError::AlreadyProcessed,
        other => other,
    }
}

fn validate_submission(submission: &NewApprovalRequest) -> Result<(), RoutingError> {
    if submission.id.0.trim().is_empty() || submission.id.0.contains(':') {
        return Err(RoutingError::InvalidRequest(
            "request id must be non-empty and must not contain `:`".to_string(),
        ));
    }
    if submission.title.trim().is_empty() {
        return Err(RoutingError::InvalidRequest("title is required".to_string()));
    }
    if !submission.submitted_by.contains('@') {
        return Err(RoutingError::InvalidRequest("submitted_by must be an email".to_string()));
    }
    if submission.total_amount < Decimal::ZERO {
        return Err(RoutingError::InvalidRequest("total_amount cannot be negative".to_string()));
    }
    Ok(())
}
