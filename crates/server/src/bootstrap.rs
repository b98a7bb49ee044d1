use std::sync::Arc;

use stayql_agent::{AnalystError, AnalystService, OpenAiCompatibleClient, ProviderError, ServiceOptions};
use stayql_core::audit::TracingAuditSink;
use stayql_core::config::{AppConfig, ConfigError, LoadOptions};
use stayql_core::ports::{ExecutionError, ExecutionProvider};
use stayql_db::{DbPool, SqliteExecutionProvider};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    /// Read-only pool shared with the execution provider; used by the health probe.
    pub dataset: DbPool,
    pub analyst: Arc<AnalystService>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("dataset connection failed: {0}")]
    Dataset(#[source] ExecutionError),
    #[error("llm client could not be built: {0}")]
    Llm(#[source] ProviderError),
    #[error(transparent)]
    Analyst(#[from] AnalystError),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        llm_provider = ?config.llm.provider,
        "starting application bootstrap"
    );

    let provider =
        SqliteExecutionProvider::connect(&config.dataset).await.map_err(BootstrapError::Dataset)?;
    let dataset = provider.pool().clone();
    info!(
        event_name = "system.bootstrap.dataset_connected",
        correlation_id = "bootstrap",
        access_mode = ?provider.access_mode(),
        "dataset connection established"
    );

    let llm = OpenAiCompatibleClient::from_config(&config.llm).map_err(BootstrapError::Llm)?;
    let analyst = AnalystService::new(
        Arc::new(llm),
        Arc::new(provider),
        Arc::new(TracingAuditSink),
        ServiceOptions::from_config(&config),
    )?;
    info!(
        event_name = "system.bootstrap.analyst_ready",
        correlation_id = "bootstrap",
        model = %config.llm.model,
        sql_model = %config.llm.sql_model(),
        "analyst service initialized"
    );

    Ok(Application { config, dataset, analyst: Arc::new(analyst) })
}
