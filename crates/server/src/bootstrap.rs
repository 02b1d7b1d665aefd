use std::sync::Arc;

use ladder_core::config::{AppConfig, ConfigError};
use ladder_core::ports::{LevelConfigStore, Notifier};
use ladder_core::{RoutingEngine, TokenCodec};
use ladder_db::{
    connect_with_settings, migrations, DbPool, SqlLevelConfigRepository, SqlRequestRepository,
    SqlStepRepository,
};
use tera::Tera;
use thiserror::Error;
use tracing::info;

use crate::approval::{self, ApprovalState};
use crate::artifacts::FsArtifactMover;
use crate::notify::{self, MessageNotifier};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub engine: RoutingEngine,
    pub levels: Arc<dyn LevelConfigStore>,
    pub notifier_transport: &'static str,
    page_templates: Arc<Tera>,
}

impl Application {
    pub fn approval_state(&self) -> ApprovalState {
        ApprovalState {
            engine: self.engine.clone(),
            levels: self.levels.clone(),
            max_levels: self.config.approval.max_levels,
            templates: self.page_templates.clone(),
            admin_api_key: self.config.server.admin_api_key.clone(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("templates failed to load: {0}")]
    Templates(#[source] tera::Error),
    #[error("notification webhook client failed to build: {0}")]
    Notifier(#[source] reqwest::Error),
}

#[cfg(test)]
pub async fn bootstrap(
    options: ladder_core::config::LoadOptions,
) -> Result<Application, BootstrapError> {
    bootstrap_with_config(AppConfig::load(options)?).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let page_templates = Arc::new(approval::init_templates().map_err(BootstrapError::Templates)?);
    let templates = notify::init_templates().map_err(BootstrapError::Templates)?;
    let message_notifier = match &config.notifier.webhook_url {
        Some(url) => MessageNotifier::webhook(url, config.notifier.timeout_secs, templates)
            .map_err(BootstrapError::Notifier)?,
        None => MessageNotifier::log_only(templates),
    };
    let notifier_transport = message_notifier.transport_name();
    let notifier: Arc<dyn Notifier> = Arc::new(message_notifier);

    let levels: Arc<dyn LevelConfigStore> =
        Arc::new(SqlLevelConfigRepository::new(db_pool.clone()));
    let mut engine = RoutingEngine::new(
        levels.clone(),
        Arc::new(SqlRequestRepository::new(db_pool.clone())),
        Arc::new(SqlStepRepository::new(db_pool.clone())),
        notifier,
        TokenCodec::new(config.approval.token_secret.clone()),
        config.server.public_base_url.clone(),
    );
    if let Some(root) = &config.artifacts.root {
        engine = engine.with_artifact_mover(Arc::new(FsArtifactMover::new(root.clone())));
    }

    info!(
        event_name = "system.bootstrap.engine_ready",
        correlation_id = "bootstrap",
        notifier_transport,
        artifact_relocation = config.artifacts.root.is_some(),
        "routing engine initialized"
    );

    Ok(Application { config, db_pool, engine, levels, notifier_transport, page_templates })
}

#[cfg(test)]
mod tests {
    use ladder_core::config::{ConfigOverrides, LoadOptions};
    use ladder_core::domain::level::ApprovalLevelConfig;
    use ladder_core::domain::request::{NewApprovalRequest, RequestId};
    use ladder_core::AuditContext;
    use rust_decimal::Decimal;

    use crate::bootstrap::bootstrap;

    fn valid_overrides(database_url: &str) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some(database_url.to_string()),
                token_secret: Some("bootstrap-test-signing-secret".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_a_token_secret() {
        let result = bootstrap(LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        })
        .await;

        let message = result.err().expect("error").to_string();
        assert!(message.contains("approval.token_secret"));
    }

    #[tokio::test]
    async fn bootstrapped_engine_routes_over_the_migrated_database() {
        let app = bootstrap(valid_overrides("sqlite::memory:"))
            .await
            .expect("bootstrap should succeed with valid overrides");
        assert_eq!(app.notifier_transport, "log");

        let (table_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM sqlite_master \
             WHERE type = 'table' AND name IN ('approval_level_config', 'approval_request', 'approval_step')",
        )
        .fetch_one(&app.db_pool)
        .await
        .expect("expected approval tables to be available after bootstrap");
        assert_eq!(table_count, 3);

        app.levels
            .upsert_level(&ApprovalLevelConfig {
                level: 1,
                level_name: "Supervisor".to_string(),
                max_amount: None,
                approver_email: "supervisor@example.com".to_string(),
                is_active: true,
            })
            .await
            .expect("seed level");

        let submitted = app
            .engine
            .submit(
                NewApprovalRequest {
                    id: RequestId("REQ-BOOT-1".to_string()),
                    title: "Boot check".to_string(),
                    submitted_by: "buyer@example.com".to_string(),
                    total_amount: Decimal::from(250),
                    artifacts: Vec::new(),
                    approved_destination: None,
                },
                &AuditContext::system("bootstrap-test"),
            )
            .await
            .expect("submit");
        assert!(submitted.approval.approve_url.starts_with("http://localhost:8080/approve?token="));

        app.db_pool.close().await;
    }
}
