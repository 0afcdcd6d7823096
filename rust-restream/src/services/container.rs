//! Service container.
//!
//! Wires the repository, launcher and orchestrator together and owns their
//! lifecycle.

use std::sync::Arc;

use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::Result;
use crate::config::AppConfig;
use crate::database::repositories::SqlxStreamJobRepository;
use crate::media::MediaLibrary;
use crate::orchestrator::{FfmpegLauncher, JobOrchestrator, ShutdownPolicy};

pub struct ServiceContainer {
    pub pool: SqlitePool,
    pub media: MediaLibrary,
    pub orchestrator: Arc<JobOrchestrator>,
    cancellation_token: CancellationToken,
}

impl ServiceContainer {
    /// Build every service and reclassify records a previous run left active.
    pub async fn new(config: &AppConfig, pool: SqlitePool) -> Result<Self> {
        info!("Initializing service container");

        let media = MediaLibrary::new(&config.media_root);
        let repo = Arc::new(SqlxStreamJobRepository::new(pool.clone()));
        let launcher = Arc::new(FfmpegLauncher::new(config.encoder.clone(), media.clone()));
        let orchestrator = JobOrchestrator::new(config.orchestrator.clone(), repo, launcher)?;

        orchestrator.recover_orphans().await?;

        info!(
            media_root = %config.media_root.display(),
            job_log_dir = %config.orchestrator.job_log_dir.display(),
            "Service container initialized"
        );

        Ok(Self {
            pool,
            media,
            orchestrator,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Token cancelled when the container shuts down.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    pub async fn shutdown(&self, policy: ShutdownPolicy) {
        info!(%policy, "Shutting down services");
        self.cancellation_token.cancel();
        self.orchestrator.shutdown(policy).await;
        self.pool.close().await;
        info!("Services shut down");
    }
}
