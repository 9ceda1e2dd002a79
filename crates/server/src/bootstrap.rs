use std::sync::Arc;

use taskforge_agent::{DecompositionPipeline, PipelineError};
use taskforge_core::config::{AppConfig, ConfigError};
use taskforge_db::{
    connect_with_settings, migrations, DbPool, SqlPlanMaterializer, SqlProjectRepository,
};
use thiserror::Error;
use tracing::info;

use crate::decompose::DecomposeState;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub pipeline: Arc<DecompositionPipeline>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("decomposition pipeline setup failed: {0}")]
    Pipeline(#[from] PipelineError),
}

impl Application {
    pub fn decompose_state(&self) -> DecomposeState {
        DecomposeState {
            projects: Arc::new(SqlProjectRepository::new(self.db_pool.clone())),
            materializer: Arc::new(SqlPlanMaterializer::new(self.db_pool.clone())),
            pipeline: self.pipeline.clone(),
            sprint_resolution: self.config.pipeline.sprint_resolution,
        }
    }
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = config.llm.provider.as_str(),
        llm_model = %config.llm.model,
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

    let pipeline = DecompositionPipeline::from_config(&config.llm)?;
    info!(
        event_name = "system.bootstrap.pipeline_ready",
        correlation_id = "bootstrap",
        llm_timeout_secs = pipeline.llm_timeout().as_secs(),
        sprint_resolution = config.pipeline.sprint_resolution.as_str(),
        "decomposition pipeline ready"
    );

    Ok(Application { config, db_pool, pipeline: Arc::new(pipeline) })
}
