use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::domain::level::ApprovalLevelConfig;
use crate::errors::StoreError;
use crate::ports::LevelConfigStore;

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum PolicyError {
    #[error("no active approval levels are configured")]
    Unconfigured,
    #[error("request total cannot be negative")]
    NegativeTotal,
}

/// How deep a request has to climb, and which rungs it will touch on the way.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPolicy {
    pub max_level: u32,
    pub levels: Vec<ApprovalLevelConfig>,
}

impl ResolvedPolicy {
    pub fn first(&self) -> Option<&ApprovalLevelConfig> {
        self.levels.first()
    }

    pub fn level(&self, level: u32) -> Option<&ApprovalLevelConfig> {
        self.levels.iter().find(|config| config.level == level)
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct LevelPolicy;

impl LevelPolicy {
    /// Walks `levels` in the order given. The first level whose ceiling covers the total
    /// (inclusive, or no ceiling) is the last one required.
    pub fn resolve(
        total: Decimal,
        levels: &[ApprovalLevelConfig],
    ) -> Result<ResolvedPolicy, PolicyError> {
        if levels.is_empty() {
            return Err(PolicyError::Unconfigured);
        }
        if total < Decimal::ZERO {
            return Err(PolicyError::NegativeTotal);
        }

        let mut required = 1_u32;
        for config in levels {
            if config.can_finally_approve(total) {
                required = config.level;
                break;
            }
            required = config.level.saturating_add(1);
        }

        let configured = u32::try_from(levels.len()).unwrap_or(u32::MAX);
        let max_level = required.clamp(1, configured);
        let take = usize::try_from(max_level).unwrap_or(levels.len());

        Ok(ResolvedPolicy { max_level, levels: levels[..take].to_vec() })
    }
}

#[derive(Debug, Error)]
pub enum LadderError {
    #[error("level {level} is outside the allowed range 1..={max_levels}")]
    LevelOutOfRange { level: u32, max_levels: u32 },
    #[error("level {0} needs a name")]
    EmptyName(u32),
    #[error("level {level} approver `{email}` is not an email address")]
    InvalidApproverEmail { level: u32, email: String },
    #[error("level {0} has a negative ceiling")]
    NegativeCeiling(u32),
    #[error("active levels must be numbered from 1 without gaps; expected {expected}, found {found}")]
    Gap { expected: u32, found: u32 },
    #[error("level {level} ceiling must be greater than level {previous}")]
    CeilingNotIncreasing { level: u32, previous: u32 },
    #[error("level {0} has no ceiling, so it must be the last active level")]
    UnlimitedNotLast(u32),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Checks a whole ladder the way it would be resolved: active rungs only, ascending.
pub fn validate_ladder(levels: &[ApprovalLevelConfig], max_levels: u32) -> Result<(), LadderError> {
    for config in levels {
        validate_level(config, max_levels)?;
    }

    let mut active: Vec<&ApprovalLevelConfig> =
        levels.iter().filter(|config| config.is_active).collect();
    active.sort_by_key(|config| config.level);

    let mut previous: Option<&ApprovalLevelConfig> = None;
    for (index, config) in active.iter().enumerate() {
        let expected = u32::try_from(index).unwrap_or(u32::MAX).saturating_add(1);
        if config.level != expected {
            return Err(LadderError::Gap { expected, found: config.level });
        }

        if let Some(previous) = previous {
            match (previous.max_amount, config.max_amount) {
                (None, _) => return Err(LadderError::UnlimitedNotLast(previous.level)),
                (Some(lower), Some(upper)) if upper <= lower => {
                    return Err(LadderError::CeilingNotIncreasing {
                        level: config.level,
                        previous: previous.level,
                    });
                }
                _ => {}
            }
        }
        previous = Some(config);
    }

    Ok(())
}

fn validate_level(config: &ApprovalLevelConfig, max_levels: u32) -> Result<(), LadderError> {
    if config.level == 0 || config.level > max_levels {
        return Err(LadderError::LevelOutOfRange { level: config.level, max_levels });
    }
    if config.level_name.trim().is_empty() {
        return Err(LadderError::EmptyName(config.level));
    }
    let email = config.approver_email.trim();
    let well_formed = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && !domain.is_empty());
    if !well_formed {
        return Err(LadderError::InvalidApproverEmail {
            level: config.level,
            email: config.approver_email.clone(),
        });
    }
    if config.max_amount.is_some_and(|ceiling| ceiling < Decimal::ZERO) {
        return Err(LadderError::NegativeCeiling(config.level));
    }
    Ok(())
}

/// Merges `config` into the stored ladder and writes it only if the result still resolves
/// cleanly. Returns the ladder as it now stands. Accepted and refused changes are audited.
pub async fn save_level_config(
    store: &dyn LevelConfigStore,
    config: ApprovalLevelConfig,
    max_levels: u32,
    audit: &dyn AuditSink,
    context: &AuditContext,
) -> Result<Vec<ApprovalLevelConfig>, LadderError> {
    let config = ApprovalLevelConfig {
        level_name: config.level_name.trim().to_string(),
        approver_email: config.approver_email.trim().to_string(),
        ..config
    };

    let mut ladder = store.all_levels().await?;
    match ladder.iter_mut().find(|existing| existing.level == config.level) {
        Some(existing) => *existing = config.clone(),
        None => ladder.push(config.clone()),
    }
    ladder.sort_by_key(|existing| existing.level);

    if let Err(error) = validate_ladder(&ladder, max_levels) {
        audit.emit(
            level_event(context, "approval.level.refused", AuditOutcome::Rejected, &config)
                .with_metadata("reason", error.to_string()),
        );
        return Err(error);
    }
    store.upsert_level(&config).await?;

    tracing::info!(
        event_name = "approval.level.saved",
        correlation_id = %context.correlation_id,
        actor = %context.actor,
        level = config.level,
        level_name = %config.level_name,
        is_active = config.is_active,
        "approval level saved"
    );
    audit.emit(level_event(context, "approval.level.saved", AuditOutcome::Success, &config));

    Ok(ladder)
}

fn level_event(
    context: &AuditContext,
    event_type: &str,
    outcome: AuditOutcome,
    config: &ApprovalLevelConfig,
) -> AuditEvent {
    AuditEvent::new(
        None,
        context.correlation_id.clone(),
        event_type,
        AuditCategory::Configuration,
        context.actor.clone(),
        outcome,
    )
    .with_metadata("level", config.level.to_string())
    .with_metadata("approver", config.approver_email.clone())
    .with_metadata("is_active", config.is_active.to_string())
}

#[cfg(test)]
mod tests {
    use rust_decimal::Decimal;

    use super::{save_level_config, validate_ladder, LadderError, LevelPolicy, PolicyError};
    use crate::audit::{AuditCategory, AuditContext, AuditOutcome, InMemoryAuditSink};
    use crate::domain::level::ApprovalLevelConfig;
    use crate::ports::LevelConfigStore;
    use crate::store::memory::InMemoryLevelConfigStore;

    fn level(level: u32, max_amount: Option<i64>) -> ApprovalLevelConfig {
        ApprovalLevelConfig {
            level,
            level_name: format!("Level {level}"),
            max_amount: max_amount.map(|amount| Decimal::new(amount, 0)),
            approver_email: format!("approver{level}@example.com"),
            is_active: true,
        }
    }

    fn three_rungs() -> Vec<ApprovalLevelConfig> {
        vec![level(1, Some(1_000)), level(2, Some(10_000)), level(3, None)]
    }

    #[test]
    fn mid_range_total_needs_two_levels() {
        let resolved = LevelPolicy::resolve(Decimal::new(5_000, 0), &three_rungs()).expect("ok");
        assert_eq!(resolved.max_level, 2);
        assert_eq!(resolved.levels.len(), 2);
        assert_eq!(resolved.first().map(|config| config.level), Some(1));
    }

    #[test]
    fn large_total_climbs_to_the_unlimited_level() {
        let resolved = LevelPolicy::resolve(Decimal::new(50_000, 0), &three_rungs()).expect("ok");
        assert_eq!(resolved.max_level, 3);
        assert!(resolved.level(3).is_some_and(|config| config.max_amount.is_none()));
    }

    #[test]
    fn total_equal_to_a_ceiling_stays_at_that_level() {
        let ladder = three_rungs();
        assert_eq!(LevelPolicy::resolve(Decimal::new(1_000, 0), &ladder).map(|r| r.max_level), Ok(1));
        assert_eq!(
            LevelPolicy::resolve(Decimal::new(10_000, 0), &ladder).map(|r| r.max_level),
            Ok(2)
        );
        assert_eq!(
            LevelPolicy::resolve(Decimal::new(1_000_001, 3), &ladder).map(|r| r.max_level),
            Ok(2)
        );
    }

    #[test]
    fn zero_total_needs_one_level() {
        let resolved = LevelPolicy::resolve(Decimal::ZERO, &three_rungs()).expect("ok");
        assert_eq!(resolved.max_level, 1);
    }

    #[test]
    fn total_above_every_ceiling_is_clamped_to_the_ladder_height() {
        let ladder = vec![level(1, Some(1_000)), level(2, Some(10_000))];
        let resolved = LevelPolicy::resolve(Decimal::new(999_999, 0), &ladder).expect("ok");
        assert_eq!(resolved.max_level, 2);
    }

    #[test]
    fn resolved_depth_always_fits_the_ladder() {
        let ladders = [
            vec![level(1, Some(100))],
            vec![level(1, None)],
            vec![level(1, Some(100)), level(2, Some(200))],
            three_rungs(),
            vec![level(1, Some(10)), level(2, Some(20)), level(3, Some(30)), level(4, Some(40))],
        ];
        let totals = [0_i64, 1, 10, 99, 100, 101, 200, 5_000, 50_000, 10_000_000];

        for ladder in &ladders {
            let height = u32::try_from(ladder.len()).expect("small ladder");
            for total in totals {
                let resolved =
                    LevelPolicy::resolve(Decimal::new(total, 0), ladder).expect("resolves");
                assert!((1..=height).contains(&resolved.max_level), "total {total}");
                assert_eq!(resolved.levels.len(), resolved.max_level as usize);
            }
        }
    }

    #[test]
    fn empty_ladder_is_unconfigured() {
        assert_eq!(LevelPolicy::resolve(Decimal::ONE, &[]), Err(PolicyError::Unconfigured));
        assert_eq!(
            LevelPolicy::resolve(Decimal::NEGATIVE_ONE, &three_rungs()),
            Err(PolicyError::NegativeTotal)
        );
    }

    #[test]
    fn ladder_validation_catches_misordered_ceilings() {
        assert!(validate_ladder(&three_rungs(), 3).is_ok());

        let stranded = vec![level(1, None), level(2, Some(10_000))];
        assert!(matches!(validate_ladder(&stranded, 3), Err(LadderError::UnlimitedNotLast(1))));

        let flat = vec![level(1, Some(1_000)), level(2, Some(1_000))];
        assert!(matches!(
            validate_ladder(&flat, 3),
            Err(LadderError::CeilingNotIncreasing { level: 2, previous: 1 })
        ));

        let gapped = vec![level(1, Some(1_000)), level(3, None)];
        assert!(matches!(
            validate_ladder(&gapped, 3),
            Err(LadderError::Gap { expected: 2, found: 3 })
        ));
    }

    #[test]
    fn inactive_levels_do_not_count_towards_ordering() {
        let mut ladder = vec![level(1, Some(1_000)), level(2, None), level(3, Some(5))];
        ladder[2].is_active = false;
        assert!(validate_ladder(&ladder, 3).is_ok());
    }

    #[test]
    fn level_fields_are_checked_individually() {
        assert!(matches!(
            validate_ladder(&[level(4, None)], 3),
            Err(LadderError::LevelOutOfRange { level: 4, max_levels: 3 })
        ));

        let mut unnamed = level(1, None);
        unnamed.level_name = "  ".to_string();
        assert!(matches!(validate_ladder(&[unnamed], 3), Err(LadderError::EmptyName(1))));

        let mut no_email = level(1, None);
        no_email.approver_email = "finance".to_string();
        assert!(matches!(
            validate_ladder(&[no_email], 3),
            Err(LadderError::InvalidApproverEmail { level: 1, .. })
        ));

        assert!(matches!(
            validate_ladder(&[level(1, Some(-5))], 3),
            Err(LadderError::NegativeCeiling(1))
        ));
    }

    #[tokio::test]
    async fn save_rejects_a_change_that_would_strand_later_levels() {
        let store = InMemoryLevelConfigStore::with_levels(three_rungs());
        let audit = InMemoryAuditSink::default();

        let result =
            save_level_config(&store, level(2, None), 3, &audit, &AuditContext::new("c-1", "admin"))
                .await;
        assert!(matches!(result, Err(LadderError::UnlimitedNotLast(2))));

        let stored = store.all_levels().await.expect("levels");
        assert_eq!(stored[1].max_amount, Some(Decimal::new(10_000, 0)));

        let events = audit.events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "approval.level.refused");
        assert_eq!(events[0].outcome, AuditOutcome::Rejected);
        assert!(events[0].metadata.contains_key("reason"));
    }

    #[tokio::test]
    async fn save_writes_a_valid_change_and_returns_the_new_ladder() {
        let store = InMemoryLevelConfigStore::with_levels(three_rungs());
        let mut raised = level(2, Some(25_000));
        raised.approver_email = "  director@example.com ".to_string();

        let audit = InMemoryAuditSink::default();

        let ladder = save_level_config(&store, raised, 3, &audit, &AuditContext::new("c-2", "admin"))
            .await
            .expect("saved");
        assert_eq!(ladder[1].max_amount, Some(Decimal::new(25_000, 0)));

        let active = store.active_levels().await.expect("levels");
        assert_eq!(active[1].approver_email, "director@example.com");

        let events = audit.events();
        assert_eq!(audit.event_types(), vec!["approval.level.saved".to_string()]);
        assert_eq!(events[0].category, AuditCategory::Configuration);
        assert_eq!(events[0].actor, "admin");
        assert_eq!(events[0].metadata.get("approver").map(String::as_str), Some("director@example.com"));
    }
}
