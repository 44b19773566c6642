use std::sync::Arc;

use courier::database::{self, SqlxDeliveryTracker, SqlxJobStore, SqlxLogStore};
use courier::integrations::IntegrationManager;
use courier::stores::{InMemoryAppStore, InMemoryUserStore};
use courier::templates::{EmailTemplate, InMemoryTemplateStore};
use courier::utils::SystemClock;
use courier::{DispatchConfig, DispatchServices, Dispatcher, logging};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = DispatchConfig::from_env()?;

    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;
    if let Some(filter) = &config.log_filter {
        logging_config.set_filter(filter)?;
    }
    let shutdown = CancellationToken::new();
    logging_config.start_retention_cleanup(shutdown.clone());

    let pool = database::init_pool(&config.database_url).await?;
    database::run_migrations(&pool).await?;

    let dispatcher = Dispatcher::new(
        &config,
        DispatchServices {
            apps: Arc::new(InMemoryAppStore::new()),
            users: Arc::new(InMemoryUserStore::new()),
            tracker: Arc::new(SqlxDeliveryTracker::new(pool.clone())),
            logs: Arc::new(SqlxLogStore::new(pool.clone())),
            integrations: IntegrationManager::new(),
            email_templates: Arc::new(InMemoryTemplateStore::<EmailTemplate>::new()),
            clock: Arc::new(SystemClock),
            job_store: Some(Arc::new(SqlxJobStore::new(pool.clone()))),
        },
    );
    dispatcher.start()?;

    tracing::info!(
        database = %config.database_url,
        log_dir = %config.log_dir.display(),
        log_filter = %logging_config.get_filter(),
        "courier started"
    );

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");

    shutdown.cancel();
    dispatcher.shutdown().await;
    pool.close().await;

    tracing::info!("courier stopped");
    Ok(())
}
