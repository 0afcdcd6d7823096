use anyhow::Context;
use rust_restream::api::{ApiServer, AppState};
use rust_restream::config::AppConfig;
use rust_restream::database;
use rust_restream::logging::{self, panic_hook};
use rust_restream::services::ServiceContainer;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("invalid configuration")?;

    let (logging_config, _guard) = logging::init_logging(&config.log_dir)?;
    panic_hook::install(&config.log_dir);

    info!(version = env!("CARGO_PKG_VERSION"), "Starting rust-restream");

    let pool = database::init_pool(&config.database_url)
        .await
        .with_context(|| format!("failed to open database {}", config.database_url))?;
    database::run_migrations(&pool).await?;

    let container = ServiceContainer::new(&config, pool).await?;
    logging_config.start_retention_cleanup(container.cancellation_token());

    let state = AppState::new(container.orchestrator.clone(), container.media.clone())
        .with_logging(logging_config.clone());
    let server_token = container.cancellation_token().child_token();
    let server = ApiServer::new(config.api.clone(), state, server_token.clone());
    let mut server_task = tokio::spawn(async move { server.run().await });

    let finished = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutdown signal received");
            None
        }
        result = &mut server_task => Some(result),
    };

    server_token.cancel();
    container.shutdown(config.orchestrator.shutdown_policy).await;

    let server_result = match finished {
        Some(result) => result,
        None => server_task.await,
    };
    match server_result {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!("API server error: {}", e),
        Err(e) => error!("API server task failed: {}", e),
    }

    info!("rust-restream stopped");
    Ok(())
}
