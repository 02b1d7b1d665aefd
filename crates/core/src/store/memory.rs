use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::domain::approval::{ApprovalStatus, ApprovalStep, StepId};
use crate::domain::level::ApprovalLevelConfig;
use crate::domain::request::{ApprovalRequest, ArtifactRef, RequestId, RequestUpdate};
use crate::errors::{SideEffectError, StoreError};
use crate::ports::{
    AdvanceNotice, ApprovalRequestNotice, ArtifactMover, FinalizedNotice, LevelConfigStore,
    Notifier, RejectedNotice, RequestStore, StepStore,
};

#[derive(Default)]
pub struct InMemoryLevelConfigStore {
    levels: RwLock<HashMap<u32, ApprovalLevelConfig>>,
}

impl InMemoryLevelConfigStore {
    pub fn with_levels(levels: Vec<ApprovalLevelConfig>) -> Self {
        Self { levels: RwLock::new(levels.into_iter().map(|config| (config.level, config)).collect()) }
    }
}

#[async_trait]
impl LevelConfigStore for InMemoryLevelConfigStore {
    async fn active_levels(&self) -> Result<Vec<ApprovalLevelConfig>, StoreError> {
        let mut active: Vec<_> =
            self.all_levels().await?.into_iter().filter(|config| config.is_active).collect();
        active.sort_by_key(|config| config.level);
        Ok(active)
    }

    async fn all_levels(&self) -> Result<Vec<ApprovalLevelConfig>, StoreError> {
        let levels = self.levels.read().await;
        let mut all: Vec<_> = levels.values().cloned().collect();
        all.sort_by_key(|config| config.level);
        Ok(all)
    }

    async fn upsert_level(&self, config: &ApprovalLevelConfig) -> Result<(), StoreError> {
        let mut levels = self.levels.write().await;
        levels.insert(config.level, config.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryRequestStore {
    requests: RwLock<HashMap<String, ApprovalRequest>>,
}

#[async_trait]
impl RequestStore for InMemoryRequestStore {
    async fn get_by_id(&self, id: &RequestId) -> Result<Option<ApprovalRequest>, StoreError> {
        let requests = self.requests.read().await;
        Ok(requests.get(&id.0).cloned())
    }

    async fn create(&self, request: &ApprovalRequest) -> Result<(), StoreError> {
        let mut requests = self.requests.write().await;
        if requests.contains_key(&request.id.0) {
            return Err(StoreError::Conflict(format!("request {}", request.id)));
        }
        requests.insert(request.id.0.clone(), request.clone());
        Ok(())
    }

    async fn update_if_pending(
        &self,
        id: &RequestId,
        update: &RequestUpdate,
    ) -> Result<bool, StoreError> {
        let mut requests = self.requests.write().await;
        match requests.get_mut(&id.0) {
            Some(request) if request.is_pending() => {
                request.apply(update);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

#[derive(Default)]
pub struct InMemoryStepStore {
    steps: RwLock<HashMap<String, ApprovalStep>>,
}

impl InMemoryStepStore {
    pub async fn step_count(&self) -> usize {
        self.steps.read().await.len()
    }
}

#[async_trait]
impl StepStore for InMemoryStepStore {
    async fn create(&self, step: &ApprovalStep) -> Result<(), StoreError> {
        let mut steps = self.steps.write().await;
        let duplicate = steps.values().any(|existing| {
            existing.token == step.token
                || (existing.request_id == step.request_id && existing.level == step.level)
        });
        if duplicate || steps.contains_key(&step.id.0) {
            return Err(StoreError::Conflict(format!(
                "step for {} level {}",
                step.request_id, step.level
            )));
        }
        steps.insert(step.id.0.clone(), step.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: &StepId) -> Result<Option<ApprovalStep>, StoreError> {
        let steps = self.steps.read().await;
        Ok(steps.get(&id.0).cloned())
    }

    async fn list_for_request(&self, id: &RequestId) -> Result<Vec<ApprovalStep>, StoreError> {
        let steps = self.steps.read().await;
        let mut matching: Vec<_> =
            steps.values().filter(|step| &step.request_id == id).cloned().collect();
        matching.sort_by_key(|step| step.level);
        Ok(matching)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<ApprovalStep>, StoreError> {
        let steps = self.steps.read().await;
        Ok(steps.values().find(|step| step.token == token).cloned())
    }

    async fn transition_if_pending(
        &self,
        id: &StepId,
        status: ApprovalStatus,
        comment: Option<&str>,
        acted_at: DateTime<Utc>,
    ) -> Result<Option<ApprovalStep>, StoreError> {
        let mut steps = self.steps.write().await;
        match steps.get_mut(&id.0) {
            Some(step) if step.is_pending() => {
                step.status = status;
                step.comment = comment.map(str::to_string);
                step.acted_at = Some(acted_at);
                Ok(Some(step.clone()))
            }
            _ => Ok(None),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SentNotice {
    ApprovalRequest(ApprovalRequestNotice),
    Advance(AdvanceNotice),
    Finalized(FinalizedNotice),
    Rejected(RejectedNotice),
}

/// Keeps every notice it is handed. With `failing()` it records and then reports failure.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    sent: Arc<Mutex<Vec<SentNotice>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let notifier = Self::default();
        notifier.fail.store(true, Ordering::SeqCst);
        notifier
    }

    pub fn sent(&self) -> Vec<SentNotice> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn record(&self, notice: SentNotice) -> Result<(), SideEffectError> {
        match self.sent.lock() {
            Ok(mut sent) => sent.push(notice),
            Err(poisoned) => poisoned.into_inner().push(notice),
        }
        if self.fail.load(Ordering::SeqCst) {
            return Err(SideEffectError::NotificationDeliveryFailure(
                "recording notifier set to fail".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_approval_request(
        &self,
        notice: &ApprovalRequestNotice,
    ) -> Result<(), SideEffectError> {
        self.record(SentNotice::ApprovalRequest(notice.clone()))
    }

    async fn send_advance_notice(&self, notice: &AdvanceNotice) -> Result<(), SideEffectError> {
        self.record(SentNotice::Advance(notice.clone()))
    }

    async fn send_finalized_notice(
        &self,
        notice: &FinalizedNotice,
    ) -> Result<(), SideEffectError> {
        self.record(SentNotice::Finalized(notice.clone()))
    }

    async fn send_rejected_notice(&self, notice: &RejectedNotice) -> Result<(), SideEffectError> {
        self.record(SentNotice::Rejected(notice.clone()))
    }
}

#[derive(Clone, Default)]
pub struct RecordingArtifactMover {
    moves: Arc<Mutex<Vec<(Vec<ArtifactRef>, String)>>>,
    fail: Arc<AtomicBool>,
}

impl RecordingArtifactMover {
    pub fn failing() -> Self {
        let mover = Self::default();
        mover.fail.store(true, Ordering::SeqCst);
        mover
    }

    pub fn moves(&self) -> Vec<(Vec<ArtifactRef>, String)> {
        match self.moves.lock() {
            Ok(moves) => moves.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl ArtifactMover for RecordingArtifactMover {
    async fn move_to_approved_location(
        &self,
        artifacts: &[ArtifactRef],
        destination: &str,
    ) -> Result<(), SideEffectError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(SideEffectError::ArtifactMoveFailure(format!(
                "cannot reach {destination}"
            )));
        }
        match self.moves.lock() {
            Ok(mut moves) => moves.push((artifacts.to_vec(), destination.to_string())),
            Err(poisoned) => {
                poisoned.into_inner().push((artifacts.to_vec(), destination.to_string()))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use crate::domain::approval::{ApprovalStatus, ApprovalStep, StepId};
    use crate::domain::request::RequestId;
    use crate::errors::StoreError;
    use crate::ports::StepStore;
    use crate::store::memory::InMemoryStepStore;

    fn step(id: &str, level: u32, token: &str) -> ApprovalStep {
        ApprovalStep {
            id: StepId(id.to_string()),
            request_id: RequestId("REQ-1".to_string()),
            level,
            approver_email: "lead@example.com".to_string(),
            status: ApprovalStatus::Pending,
            token: token.to_string(),
            comment: None,
            acted_at: None,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn second_transition_of_the_same_step_changes_nothing() {
        let store = InMemoryStepStore::default();
        store.create(&step("STEP-1", 1, "tok-1")).await.expect("create");

        let first = store
            .transition_if_pending(&StepId("STEP-1".to_string()), ApprovalStatus::Approved, None, Utc::now())
            .await
            .expect("first");
        assert_eq!(first.map(|step| step.status), Some(ApprovalStatus::Approved));

        let second = store
            .transition_if_pending(
                &StepId("STEP-1".to_string()),
                ApprovalStatus::Rejected,
                Some("changed my mind"),
                Utc::now(),
            )
            .await
            .expect("second");
        assert!(second.is_none());

        let stored = store.find_by_token("tok-1").await.expect("find").expect("present");
        assert_eq!(stored.status, ApprovalStatus::Approved);
        assert_eq!(stored.comment, None);
    }

    #[tokio::test]
    async fn one_step_per_level_and_token() {
        let store = InMemoryStepStore::default();
        store.create(&step("STEP-1", 1, "tok-1")).await.expect("create");

        let same_level = store.create(&step("STEP-2", 1, "tok-2")).await;
        assert!(matches!(same_level, Err(StoreError::Conflict(_))));

        let same_token = store.create(&step("STEP-3", 2, "tok-1")).await;
        assert!(matches!(same_token, Err(StoreError::Conflict(_))));

        assert_eq!(store.step_count().await, 1);
    }
}
