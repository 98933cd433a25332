//! Wires configuration, the database and the intake pipeline into a
//! runnable application.

use std::sync::Arc;

use thiserror::Error;

use delguur_agent::{HttpLlmClient, LlmClient, LlmReplyGenerator};
use delguur_chat::HttpMessageSender;
use delguur_core::config::{AppConfig, ConfigError, LoadOptions};
use delguur_db::repositories::{
    SqlConversationRepository, SqlCustomerRepository, SqlOrderRepository,
    SqlProcessedEventRepository, SqlProductRepository,
};
use delguur_db::{connect_with_settings, migrations, DbPool};

use crate::intake::{IntakeDependencies, IntakePipeline, TracingAuditSink};
use crate::sheets::{HttpSheetMirror, NoopSheetMirror, SheetMirror};

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub pipeline: Arc<IntakePipeline>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("configuration error")]
    Config(#[from] ConfigError),
    #[error("could not connect to the database")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("could not run database migrations")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("could not build the llm client")]
    Llm(#[source] anyhow::Error),
}

pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    tracing::info!(
        event_name = "system.bootstrap.database_connected",
        max_connections = config.database.max_connections,
        "database pool ready"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    tracing::info!(event_name = "system.bootstrap.migrations_applied", "schema is current");

    let llm: Arc<dyn LlmClient> =
        Arc::new(HttpLlmClient::new(config.llm.clone()).map_err(BootstrapError::Llm)?);

    let mirror: Arc<dyn SheetMirror> = if config.sheets.enabled {
        match (&config.sheets.spreadsheet_id, &config.sheets.access_token) {
            (Some(spreadsheet_id), Some(access_token)) => Arc::new(HttpSheetMirror::new(
                config.sheets.api_base_url.clone(),
                spreadsheet_id.clone(),
                access_token.clone(),
            )),
            _ => {
                tracing::warn!(
                    event_name = "system.bootstrap.sheets_misconfigured",
                    "sheet mirroring enabled without credentials; mirroring is off"
                );
                Arc::new(NoopSheetMirror)
            }
        }
    } else {
        Arc::new(NoopSheetMirror)
    };

    let pipeline = Arc::new(IntakePipeline::new(IntakeDependencies {
        customers: Arc::new(SqlCustomerRepository::new(db_pool.clone())),
        conversations: Arc::new(SqlConversationRepository::new(db_pool.clone())),
        orders: Arc::new(SqlOrderRepository::new(db_pool.clone())),
        products: Arc::new(SqlProductRepository::new(db_pool.clone())),
        processed_events: Arc::new(SqlProcessedEventRepository::new(db_pool.clone())),
        llm: Arc::clone(&llm),
        replies: Arc::new(LlmReplyGenerator::new(llm)),
        sender: Arc::new(HttpMessageSender::new(
            config.channel.api_base_url.clone(),
            config.channel.page_access_token.clone(),
        )),
        mirror,
        audit: Arc::new(TracingAuditSink),
    }));
    tracing::info!(event_name = "system.bootstrap.pipeline_ready", "intake pipeline assembled");

    Ok(Application { config, db_pool, pipeline })
}
