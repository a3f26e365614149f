use std::sync::Arc;

use thiserror::Error;
use tracing::info;
use wkdesk_agent::{AgentError, AgentRuntime};
use wkdesk_core::config::{AppConfig, CheckpointMode, ConfigError, LoadOptions};
use wkdesk_db::{
    connect_with_settings, migrations, CheckpointStore, DbPool, InMemoryCheckpointStore,
    SqlCheckpointStore, SqlKeyValueStore,
};

use crate::orchestrator::TicketOrchestrator;

pub struct Application {
    pub config: AppConfig,
    pub storage_pool: DbPool,
    pub checkpoint_pool: Option<DbPool>,
    pub orchestrator: Arc<TicketOrchestrator>,
}

impl Application {
    pub async fn close(&self) {
        self.storage_pool.close().await;
        if let Some(pool) = &self.checkpoint_pool {
            pool.close().await;
        }
    }
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed ({database}): {source}")]
    DatabaseConnect {
        database: &'static str,
        #[source]
        source: sqlx::Error,
    },
    #[error("database migration failed ({database}): {source}")]
    Migration {
        database: &'static str,
        #[source]
        source: sqlx::migrate::MigrateError,
    },
    #[error("agent initialization failed: {0}")]
    Agent(#[from] AgentError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(event_name = "system.bootstrap.start", correlation_id = "bootstrap", "starting application bootstrap");

    let storage_pool = open_database(&config, &config.database.url, "storage").await?;

    let (checkpoints, checkpoint_pool): (Arc<dyn CheckpointStore>, Option<DbPool>) =
        match config.agent.checkpoints {
            CheckpointMode::Durable => {
                let pool =
                    open_database(&config, &config.database.checkpoint_url, "checkpoints").await?;
                (Arc::new(SqlCheckpointStore::new(pool.clone())), Some(pool))
            }
            CheckpointMode::Memory => {
                info!(
                    event_name = "system.bootstrap.checkpoints_in_memory",
                    correlation_id = "bootstrap",
                    "conversation checkpoints are kept in memory"
                );
                (Arc::new(InMemoryCheckpointStore::default()), None)
            }
        };

    let agent = AgentRuntime::from_config(&config.llm, &config.search, &config.agent, checkpoints)?;
    let store = Arc::new(SqlKeyValueStore::new(storage_pool.clone()));
    let orchestrator = Arc::new(TicketOrchestrator::new(store, Arc::new(agent)));

    info!(event_name = "system.bootstrap.complete", correlation_id = "bootstrap", "application bootstrapped");

    Ok(Application { config, storage_pool, checkpoint_pool, orchestrator })
}

async fn open_database(
    config: &AppConfig,
    url: &str,
    database: &'static str,
) -> Result<DbPool, BootstrapError> {
    let pool = connect_with_settings(url, config.database.max_connections, config.database.timeout_secs)
        .await
        .map_err(|source| BootstrapError::DatabaseConnect { database, source })?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        database,
        "database connection established"
    );

    migrations::run_pending(&pool)
        .await
        .map_err(|source| BootstrapError::Migration { database, source })?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        database,
        "database migrations applied"
    );

    Ok(pool)
}

#[cfg(test)]
mod tests {
    use wkdesk_core::config::{CheckpointMode, ConfigOverrides, LoadOptions};
    use wkdesk_core::UserInput;

    use crate::bootstrap::{bootstrap, BootstrapError};

    fn overrides(checkpoint_mode: CheckpointMode) -> LoadOptions {
        LoadOptions {
            overrides: ConfigOverrides {
                database_url: Some("sqlite::memory:".to_string()),
                checkpoint_database_url: Some("sqlite::memory:".to_string()),
                llm_api_key: Some("azure-test".to_string()),
                search_api_key: Some("tvly-test".to_string()),
                checkpoint_mode: Some(checkpoint_mode),
                ..ConfigOverrides::default()
            },
            ..LoadOptions::default()
        }
    }

    #[tokio::test]
    async fn bootstrap_fails_fast_without_model_credentials() {
        let mut options = overrides(CheckpointMode::Memory);
        options.overrides.llm_api_key = None;

        let result = bootstrap(options).await;

        let message = result.err().expect("bootstrap must fail").to_string();
        assert!(message.contains("llm.api_key"), "unexpected error: {message}");
    }

    #[tokio::test]
    async fn durable_mode_migrates_both_databases() {
        let app = bootstrap(overrides(CheckpointMode::Durable)).await.expect("bootstrap");

        let storage_tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'storage'",
        )
        .fetch_one(&app.storage_pool)
        .await
        .expect("storage table query");
        assert_eq!(storage_tables, 1);

        let checkpoint_pool = app.checkpoint_pool.as_ref().expect("durable mode opens checkpoint db");
        let checkpoint_tables: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'checkpoints'",
        )
        .fetch_one(checkpoint_pool)
        .await
        .expect("checkpoint table query");
        assert_eq!(checkpoint_tables, 1);

        app.close().await;
    }

    #[tokio::test]
    async fn memory_mode_skips_checkpoint_database_and_serves_tickets() {
        let app = bootstrap(overrides(CheckpointMode::Memory)).await.expect("bootstrap");
        assert!(app.checkpoint_pool.is_none());

        let id = app
            .orchestrator
            .add_ticket(UserInput { text: "Licht defekt".to_string(), client_id: "c1".to_string() })
            .await
            .expect("add ticket");
        let ticket = app.orchestrator.get_ticket(id).await.expect("get").expect("stored");
        assert_eq!(ticket.error_message, "Licht defekt");

        app.close().await;
    }

    #[test]
    fn migration_errors_name_the_database() {
        let error = BootstrapError::Migration {
            database: "checkpoints",
            source: sqlx::migrate::MigrateError::VersionMissing(1),
        };
        assert!(error.to_string().contains("checkpoints"));
    }
}
