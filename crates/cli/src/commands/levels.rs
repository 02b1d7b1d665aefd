use ladder_core::audit::{AuditContext, TracingAuditSink};
use ladder_core::domain::level::ApprovalLevelConfig;
use ladder_core::policy::{save_level_config, LadderError};
use ladder_core::ports::LevelConfigStore;
use ladder_db::{migrations, SqlLevelConfigRepository};
use rust_decimal::Decimal;

use crate::commands::{load_config, open_pool, runtime, CommandResult, Failure};

#[derive(Debug, Clone)]
pub struct LevelInput {
    pub level: u32,
    pub name: String,
    pub approver: String,
    pub max_amount: Option<Decimal>,
    pub active: bool,
}

pub fn list() -> CommandResult {
    with_levels_repository("levels", |repo, _| async move {
        repo.all_levels().await.map_err(|error| ("store", error.to_string(), 7u8))
    })
}

pub fn set(input: LevelInput) -> CommandResult {
    let config = ApprovalLevelConfig {
        level: input.level,
        level_name: input.name,
        max_amount: input.max_amount,
        approver_email: input.approver,
        is_active: input.active,
    };

    with_levels_repository("levels", move |repo, max_levels| async move {
        let context = AuditContext::system("ladder-cli");
        save_level_config(&repo, config, max_levels, &TracingAuditSink, &context)
            .await
            .map_err(|error| match error {
                LadderError::Store(error) => ("store", error.to_string(), 7u8),
                other => ("ladder_validation", other.to_string(), 6u8),
            })
    })
}

fn with_levels_repository<F, Fut>(command: &str, action: F) -> CommandResult
where
    F: FnOnce(SqlLevelConfigRepository, u32) -> Fut,
    Fut: std::future::Future<Output = Result<Vec<ApprovalLevelConfig>, Failure>>,
{
    let config = match load_config(command) {
        Ok(config) => config,
        Err(result) => return result,
    };
    let runtime = match runtime(command) {
        Ok(runtime) => runtime,
        Err(result) => return result,
    };

    let result = runtime.block_on(async {
        let pool = open_pool(&config).await?;
        migrations::run_pending(&pool)
            .await
            .map_err(|error| ("migration", error.to_string(), 5u8))?;
        let ladder =
            action(SqlLevelConfigRepository::new(pool.clone()), config.approval.max_levels).await;
        pool.close().await;
        ladder
    });

    match result {
        Ok(ladder) => {
            let data = serde_json::to_value(&ladder).ok();
            CommandResult::success_with(command, render_ladder(&ladder), data)
        }
        Err((error_class, message, exit_code)) => {
            CommandResult::failure(command, error_class, message, exit_code)
        }
    }
}

fn render_ladder(ladder: &[ApprovalLevelConfig]) -> String {
    if ladder.is_empty() {
        return "no approval levels configured".to_string();
    }

    ladder
        .iter()
        .map(|level| {
            let ceiling = level
                .max_amount
                .map(|amount| format!("up to {amount}"))
                .unwrap_or_else(|| "unlimited".to_string());
            let state = if level.is_active { "" } else { " [inactive]" };
            format!(
                "level {}: {} <{}> {ceiling}{state}",
                level.level, level.level_name, level.approver_email
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}
