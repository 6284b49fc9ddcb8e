use std::sync::Arc;

use banko_agent::{recognizer_from_config, BankoRuntime, LuisSetupError};
use banko_core::config::{AppConfig, ConfigError, LoadOptions};
use banko_core::dialogs::{DefinitionError, Orchestrator, OrchestratorSettings};
use banko_core::{banking_registry, RandomLedger, TracingAuditSink};
use banko_db::{connect_with_config, migrations, DbPool, SqlConversationStore};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<BankoRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("recognizer setup failed: {0}")]
    Recognizer(#[from] LuisSetupError),
    #[error("dialog definitions are invalid: {0}")]
    Definition(#[from] DefinitionError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        nlu_provider = ?config.nlu.provider,
        "starting application bootstrap"
    );

    let db_pool =
        connect_with_config(&config.database).await.map_err(BootstrapError::DatabaseConnect)?;
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

    let registry = banking_registry(Arc::new(RandomLedger))?;
    let recognizer = recognizer_from_config(&config.nlu)?;
    let store = Arc::new(SqlConversationStore::new(db_pool.clone()));
    let orchestrator = Orchestrator::new(Arc::new(registry), store, recognizer)
        .with_audit_sink(Arc::new(TracingAuditSink))
        .with_settings(OrchestratorSettings::from_config(&config));
    info!(
        event_name = "system.bootstrap.dialogs_registered",
        correlation_id = "bootstrap",
        routes = orchestrator.registry().routes().count(),
        "dialog registry validated"
    );

    let runtime = Arc::new(BankoRuntime::new(Arc::new(orchestrator)));
    Ok(Application { config, db_pool, runtime })
}
