//! Job orchestrator.
//!
//! The facade over launcher, monitor, timer and record store. Owns the live
//! job registry and is the only component callers talk to.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::events::JobEvent;
use super::launcher::{LaunchedProcess, Launcher};
use super::monitor::run_failure_monitor;
use super::registry::{JobRegistry, LiveJob, LiveState};
use super::timer::{SupervisorContext, run_supervisor};
use crate::database::models::{JobStatus, StatusUpdate, StopReason};
use crate::database::repositories::StreamJobRepository;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::{datetime_to_ms, secs_until};
use crate::domain::{JobState, StartJobRequest, StreamJob};
use crate::utils::fs::{ensure_dir_all_sync_with_op, ensure_dir_all_with_op};
use crate::{Error, Result};

/// Upper bound accepted for the timer tick.
pub const MAX_TICK_INTERVAL: Duration = Duration::from_secs(5);

const DEFAULT_EVENT_CAPACITY: usize = 256;
const LAUNCH_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);
const SHUTDOWN_SLACK: Duration = Duration::from_secs(5);

/// What happens to live encoders when the orchestrator shuts down.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, strum::Display, strum::EnumString)]
#[strum(ascii_case_insensitive)]
pub enum ShutdownPolicy {
    /// Stop every live job and wait for its final record.
    #[default]
    #[strum(serialize = "stop", serialize = "stop_jobs")]
    StopJobs,
    /// Abandon supervision; encoders keep running and their records are
    /// reclassified `ORPHANED` on the next startup.
    #[strum(serialize = "detach")]
    Detach,
}

/// Orchestrator settings.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub tick_interval: Duration,
    /// How long an encoder gets between SIGTERM and a forced kill.
    pub grace_period: Duration,
    /// Directory holding per-job failure logs.
    pub job_log_dir: PathBuf,
    pub shutdown_policy: ShutdownPolicy,
    pub event_capacity: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            grace_period: Duration::from_secs(10),
            job_log_dir: PathBuf::from("Log"),
            shutdown_policy: ShutdownPolicy::default(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.tick_interval.is_zero() || self.tick_interval > MAX_TICK_INTERVAL {
            return Err(Error::config(format!(
                "tick interval must be in (0, {:?}], got {:?}",
                MAX_TICK_INTERVAL, self.tick_interval
            )));
        }
        if self.event_capacity == 0 {
            return Err(Error::config("event capacity must be positive"));
        }
        Ok(())
    }
}

/// Stream job orchestrator.
pub struct JobOrchestrator {
    config: OrchestratorConfig,
    repo: Arc<dyn StreamJobRepository>,
    launcher: Arc<dyn Launcher>,
    registry: Arc<JobRegistry>,
    /// Jobs whose launch task has not yet registered or failed.
    launching: DashMap<String, ()>,
    launches: TaskTracker,
    events: broadcast::Sender<JobEvent>,
    supervisor_ctx: Arc<SupervisorContext>,
    shutdown_token: CancellationToken,
}

impl JobOrchestrator {
    pub fn new(
        config: OrchestratorConfig,
        repo: Arc<dyn StreamJobRepository>,
        launcher: Arc<dyn Launcher>,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        ensure_dir_all_sync_with_op("creating job log directory", &config.job_log_dir)?;

        let (events, _) = broadcast::channel(config.event_capacity);
        let registry = Arc::new(JobRegistry::new());
        let supervisor_ctx = Arc::new(SupervisorContext {
            repo: repo.clone(),
            registry: registry.clone(),
            events: events.clone(),
            tick_interval: config.tick_interval,
            grace_period: config.grace_period,
            detach_token: CancellationToken::new(),
        });

        Ok(Arc::new(Self {
            config,
            repo,
            launcher,
            registry,
            launching: DashMap::new(),
            launches: TaskTracker::new(),
            events,
            supervisor_ctx,
            shutdown_token: CancellationToken::new(),
        }))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.events.subscribe()
    }

    /// Number of jobs with a live encoder.
    pub fn live_count(&self) -> usize {
        self.registry.len()
    }

    pub fn live_job(&self, id: &str) -> Option<Arc<LiveJob>> {
        self.registry.get(id)
    }

    /// Validate and persist a new job, then launch it in the background.
    ///
    /// Returns as soon as the `PENDING` record is stored. Launch failures are
    /// recorded on the job, not returned here.
    pub async fn start_job(self: &Arc<Self>, request: StartJobRequest) -> Result<String> {
        if self.shutdown_token.is_cancelled() {
            return Err(Error::ShuttingDown);
        }

        let model = request.validate()?.into_db_model();
        self.repo.upsert_job(&model).await?;
        let job = StreamJob::try_from(model)?;
        let job_id = job.id.clone();

        info!(job_id = %job_id, title = %job.title, duration_secs = job.total_duration_secs, "Job accepted");

        self.launching.insert(job_id.clone(), ());
        let this = self.clone();
        self.launches.spawn(async move {
            let id = job.id.clone();
            this.launch(job).await;
            this.launching.remove(&id);
        });

        Ok(job_id)
    }

    async fn launch(&self, job: StreamJob) {
        match self.launcher.launch(&job).await {
            Ok(launched) => self.begin_supervision(job, launched).await,
            Err(e) => {
                let reason = e.to_string();
                warn!(job_id = %job.id, "Launch failed: {}", reason);
                let update = StatusUpdate::failed(reason.clone());
                if let Err(e) = retry_on_sqlite_busy("mark job failed", || {
                    self.repo.transition_active(&job.id, &update)
                })
                .await
                {
                    warn!(job_id = %job.id, "Failed to record launch failure: {}", e);
                }
                let _ = self.events.send(JobEvent::Failed {
                    job_id: job.id,
                    reason,
                });
            }
        }
    }

    async fn begin_supervision(&self, job: StreamJob, launched: LaunchedProcess) {
        let LaunchedProcess {
            process,
            stderr,
            source_path,
            has_audio,
        } = launched;

        let started_at = Utc::now();
        let expected_end_at = expected_end(started_at, job.total_duration_secs);
        let remaining = secs_until(expected_end_at, started_at);
        let log_path = job_log_file(&self.config.job_log_dir, &job, started_at);
        let pid = process.pid();

        let live = match self.registry.register(LiveJob::new(
            job.id.clone(),
            process,
            started_at,
            expected_end_at,
            remaining,
            Some(log_path.clone()),
        )) {
            Ok(live) => live,
            Err(e) => {
                warn!(job_id = %job.id, "Cannot register launched encoder: {}", e);
                return;
            }
        };

        // The directory may have been removed since startup.
        if let Err(e) =
            ensure_dir_all_with_op("creating job log directory", &self.config.job_log_dir).await
        {
            warn!(job_id = %job.id, "{}", e);
        }

        if let Some(stderr) = stderr {
            live.set_monitor(tokio::spawn(run_failure_monitor(
                job.id.clone(),
                stderr,
                Some(log_path.clone()),
            )));
        }

        match self
            .repo
            .mark_running(
                &job.id,
                datetime_to_ms(started_at),
                datetime_to_ms(expected_end_at),
                remaining,
                Some(log_path.to_string_lossy().into_owned()),
            )
            .await
        {
            Ok(true) => {}
            Ok(false) => debug!(job_id = %job.id, "Record left PENDING before launch completed"),
            Err(e) => warn!(job_id = %job.id, "Failed to record job as running: {}", e),
        }

        live.set_supervisor(tokio::spawn(run_supervisor(
            self.supervisor_ctx.clone(),
            live.clone(),
        )));

        info!(
            job_id = %job.id,
            ?pid,
            source = %source_path.display(),
            silent_track = !has_audio,
            expected_end_at = %expected_end_at,
            "Job running"
        );
        let _ = self.events.send(JobEvent::Started {
            job_id: job.id,
            pid,
        });
    }

    /// Request a stop. Sends SIGTERM and records `STOPPED` without waiting
    /// for the encoder to exit. A job with no live encoder is left untouched.
    pub async fn stop_job(&self, id: &str) -> Result<()> {
        let Some(live) = self.registry.get(id) else {
            debug!(job_id = id, "Stop requested for job without a live encoder");
            return Ok(());
        };

        if !live.request_stop(StopReason::StopRequested) {
            debug!(job_id = id, "Job already stopping");
            return Ok(());
        }
        live.process.terminate();

        let update = StatusUpdate::stopped(StopReason::StopRequested, None);
        retry_on_sqlite_busy("record stop", || self.repo.transition_active(id, &update)).await?;

        info!(job_id = id, "Stop requested");
        Ok(())
    }

    /// Remove a terminal job.
    pub async fn delete_job(&self, id: &str) -> Result<()> {
        let record = self.repo.get_job(id).await?;
        let job = StreamJob::try_from(record)?;

        if let Some(live) = self.registry.get(id)
            && live.state() != LiveState::Exited
        {
            return Err(Error::invalid_state(id, "STOPPING", "delete"));
        }
        if !job.state.is_terminal() {
            return Err(Error::invalid_state(id, job.status(), "delete"));
        }

        self.registry.remove(id);
        if !self.repo.delete_job(id).await? {
            return Err(Error::not_found("StreamJob", id));
        }

        info!(job_id = id, "Job deleted");
        let _ = self.events.send(JobEvent::Deleted {
            job_id: id.to_string(),
        });
        Ok(())
    }

    /// Bring the stored record in line with what is actually running.
    pub async fn reconcile_job(&self, id: &str) -> Result<StreamJob> {
        let record = self.repo.get_job(id).await?;
        let job = StreamJob::try_from(record)?;
        let status = job.status();

        let update = match self.registry.get(id) {
            Some(live) if status == JobStatus::Running && live.process.has_exited() => {
                let reason = live.stop_reason().unwrap_or(StopReason::ProcessExited);
                Some(StatusUpdate::stopped(reason, live.process.state().exit_code()))
            }
            None if !status.is_terminal() && !self.launching.contains_key(id) => {
                Some(StatusUpdate::orphaned())
            }
            _ => None,
        };

        let Some(update) = update else {
            return Ok(job);
        };

        if self.repo.transition_active(id, &update).await? {
            if update.status == JobStatus::Orphaned {
                warn!(job_id = id, "No live encoder for active job, marked orphaned");
                let _ = self.events.send(JobEvent::Orphaned {
                    job_id: id.to_string(),
                });
            } else {
                info!(job_id = id, "Encoder already exited, record reconciled");
            }
        }

        StreamJob::try_from(self.repo.get_job(id).await?)
    }

    /// Current view of a job, with live state merged in.
    pub async fn get_job(&self, id: &str) -> Result<StreamJob> {
        let job = StreamJob::try_from(self.repo.get_job(id).await?)?;
        Ok(self.overlay(job))
    }

    /// All jobs, newest first, with live state merged in. Writes nothing.
    pub async fn list_jobs(&self) -> Result<Vec<StreamJob>> {
        self.repo
            .list_jobs()
            .await?
            .into_iter()
            .map(|model| StreamJob::try_from(model).map(|job| self.overlay(job)))
            .collect()
    }

    fn overlay(&self, mut job: StreamJob) -> StreamJob {
        match self.registry.get(&job.id) {
            Some(live) if live.state() == LiveState::Exited => {
                if !job.state.is_terminal() {
                    job.state = JobState::Stopped;
                    job.stop_reason = Some(live.stop_reason().unwrap_or(StopReason::ProcessExited));
                    job.exit_code = live.process.state().exit_code();
                }
                job.remaining_secs = 0;
            }
            Some(live) if job.state == JobState::Running => {
                job.remaining_secs = live.remaining_secs().max(0) as u64;
            }
            None if !job.state.is_terminal() && !self.launching.contains_key(&job.id) => {
                job.state = JobState::Orphaned;
                job.remaining_secs = 0;
            }
            _ => {}
        }
        job
    }

    /// Path of the job's failure log, if it has been launched.
    pub async fn job_log_path(&self, id: &str) -> Result<Option<PathBuf>> {
        if let Some(live) = self.registry.get(id) {
            return Ok(live.log_path.clone());
        }
        let job = StreamJob::try_from(self.repo.get_job(id).await?)?;
        Ok(job.log_path)
    }

    /// Flagged lines recorded for the job so far. Empty if none were written.
    pub async fn read_job_log(&self, id: &str) -> Result<Vec<String>> {
        let Some(path) = self.job_log_path(id).await? else {
            return Ok(Vec::new());
        };
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::to_string)
                .collect()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(Error::io_path("reading job log", &path, e)),
        }
    }

    /// Reclassify records left active by a previous instance.
    ///
    /// Call once at startup, before accepting jobs.
    pub async fn recover_orphans(&self) -> Result<u64> {
        let count = self.repo.orphan_active_jobs().await?;
        if count > 0 {
            warn!(count, "Marked jobs from a previous run as orphaned");
        }
        Ok(count)
    }

    /// Stop accepting jobs and apply `policy` to the live ones.
    pub async fn shutdown(&self, policy: ShutdownPolicy) {
        self.shutdown_token.cancel();
        self.launches.close();
        if tokio::time::timeout(LAUNCH_DRAIN_TIMEOUT, self.launches.wait())
            .await
            .is_err()
        {
            warn!("Timed out waiting for in-flight launches");
        }

        let jobs = self.registry.snapshot();
        match policy {
            ShutdownPolicy::Detach => {
                self.supervisor_ctx.detach_token.cancel();
                info!(count = jobs.len(), "Detached from live encoders");
            }
            ShutdownPolicy::StopJobs => {
                info!(count = jobs.len(), "Stopping live jobs");
                for job in &jobs {
                    if job.request_stop(StopReason::Shutdown) {
                        job.process.terminate();
                    }
                }

                let supervisors: Vec<_> = jobs.iter().filter_map(|job| job.take_supervisor()).collect();
                let deadline = self.config.grace_period + SHUTDOWN_SLACK;
                if tokio::time::timeout(deadline, join_all(supervisors))
                    .await
                    .is_err()
                {
                    warn!("Timed out waiting for jobs to stop");
                }
            }
        }
    }
}

fn expected_end(started_at: DateTime<Utc>, duration_secs: u64) -> DateTime<Utc> {
    i64::try_from(duration_secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .and_then(|d| started_at.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// `<video stem>_<YYYYmmdd_HHMMSS>_<id prefix>.log` inside `dir`.
fn job_log_file(dir: &Path, job: &StreamJob, started_at: DateTime<Utc>) -> PathBuf {
    let stem = Path::new(&job.video_reference)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "job".to_string());
    let id_prefix = job.id.get(..8).unwrap_or(&job.id);
    dir.join(format!(
        "{}_{}_{}.log",
        stem,
        started_at.format("%Y%m%d_%H%M%S"),
        id_prefix
    ))
}
