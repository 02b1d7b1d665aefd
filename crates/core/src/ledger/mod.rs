use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::domain::approval::{ApprovalAction, ApprovalStatus, ApprovalStep, StepId};
use crate::domain::request::RequestId;
use crate::errors::RoutingError;
use crate::ports::StepStore;
use crate::token::TokenCodec;

/// Per-request, per-level approval records. Every step is minted with its own token.
#[derive(Clone)]
pub struct StepLedger {
    store: Arc<dyn StepStore>,
    codec: TokenCodec,
}

impl StepLedger {
    pub fn new(store: Arc<dyn StepStore>, codec: TokenCodec) -> Self {
        Self { store, codec }
    }

    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    pub async fn create(
        &self,
        request_id: &RequestId,
        level: u32,
        approver_email: &str,
        now: DateTime<Utc>,
    ) -> Result<ApprovalStep, RoutingError> {
        let step = ApprovalStep {
            id: StepId::generate(),
            request_id: request_id.clone(),
            level,
            approver_email: approver_email.to_string(),
            status: ApprovalStatus::Pending,
            token: self.codec.issue_at(request_id, level, now)?,
            comment: None,
            acted_at: None,
            created_at: now,
        };
        self.store.create(&step).await?;

        tracing::debug!(
            event_name = "approval.step.created",
            request_id = %request_id,
            step_id = %step.id.0,
            level,
            "approval step created"
        );

        Ok(step)
    }

    pub async fn list_for_request(
        &self,
        request_id: &RequestId,
    ) -> Result<Vec<ApprovalStep>, RoutingError> {
        Ok(self.store.list_for_request(request_id).await?)
    }

    pub async fn find_by_token(&self, token: &str) -> Result<Option<ApprovalStep>, RoutingError> {
        Ok(self.store.find_by_token(token).await?)
    }

    pub async fn find_by_id(&self, step_id: &StepId) -> Result<Option<ApprovalStep>, RoutingError> {
        Ok(self.store.find_by_id(step_id).await?)
    }

    /// Records `action` on a pending step. Losing a race, or acting twice, is
    /// `StepAlreadyActed`; the stored step is left as the winner wrote it.
    pub async fn transition(
        &self,
        step_id: &StepId,
        action: &ApprovalAction,
        acted_at: DateTime<Utc>,
    ) -> Result<ApprovalStep, RoutingError> {
        let transitioned = self
            .store
            .transition_if_pending(step_id, action.resulting_status(), action.comment(), acted_at)
            .await?;

        match transitioned {
            Some(step) => Ok(step),
            None => match self.store.find_by_id(step_id).await? {
                Some(_) => Err(RoutingError::StepAlreadyActed),
                None => Err(RoutingError::StepNotFound(step_id.0.clone())),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Utc;
    use secrecy::SecretString;

    use super::StepLedger;
    use crate::domain::approval::{ApprovalAction, ApprovalStatus, StepId};
    use crate::domain::request::RequestId;
    use crate::errors::RoutingError;
    use crate::store::memory::InMemoryStepStore;
    use crate::token::TokenCodec;

    fn ledger() -> StepLedger {
        StepLedger::new(
            Arc::new(InMemoryStepStore::default()),
            TokenCodec::new(SecretString::from("ledger-test-secret-value".to_string())),
        )
    }

    #[tokio::test]
    async fn created_step_is_pending_and_carries_a_token_for_its_level() {
        let ledger = ledger();
        let request_id = RequestId("REQ-1".to_string());

        let step = ledger.create(&request_id, 2, "mgr@example.com", Utc::now()).await.expect("create");
        assert_eq!(step.status, ApprovalStatus::Pending);

        let verification = ledger.codec().verify(&step.token);
        assert!(verification.valid);
        assert_eq!(verification.level, Some(2));
        assert_eq!(verification.request_id, Some(request_id));

        let found = ledger.find_by_token(&step.token).await.expect("lookup");
        assert_eq!(found.map(|found| found.id), Some(step.id));
    }

    #[tokio::test]
    async fn steps_list_in_level_order() {
        let ledger = ledger();
        let request_id = RequestId("REQ-2".to_string());
        ledger.create(&request_id, 2, "b@example.com", Utc::now()).await.expect("level 2");
        ledger.create(&request_id, 1, "a@example.com", Utc::now()).await.expect("level 1");

        let levels: Vec<u32> = ledger
            .list_for_request(&request_id)
            .await
            .expect("list")
            .iter()
            .map(|step| step.level)
            .collect();
        assert_eq!(levels, vec![1, 2]);
    }

    #[tokio::test]
    async fn acting_twice_on_one_step_is_refused() {
        let ledger = ledger();
        let step = ledger
            .create(&RequestId("REQ-3".to_string()), 1, "a@example.com", Utc::now())
            .await
            .expect("create");

        let approved =
            ledger.transition(&step.id, &ApprovalAction::approve(), Utc::now()).await.expect("approve");
        assert_eq!(approved.status, ApprovalStatus::Approved);
        assert!(approved.acted_at.is_some());

        let second = ledger.transition(&step.id, &ApprovalAction::reject("no"), Utc::now()).await;
        assert_eq!(second, Err(RoutingError::StepAlreadyActed));

        let stored = ledger.find_by_id(&step.id).await.expect("find").expect("present");
        assert_eq!(stored.status, ApprovalStatus::Approved);
    }

    #[tokio::test]
    async fn unknown_step_is_reported_as_missing() {
        let result = ledger()
            .transition(&StepId("STEP-missing".to_string()), &ApprovalAction::approve(), Utc::now())
            .await;
        assert_eq!(result, Err(RoutingError::StepNotFound("STEP-missing".to_string())));
    }
}
