//! Per-job duration timer and supervisor.
//!
//! One task per live job. It persists the countdown, enforces the deadline
//! with a graceful-then-forced stop, reacts to stop requests and unexpected
//! exits, and performs the job's single final `STOPPED` write.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::JobEvent;
use super::process::{ProcessState, Termination};
use super::registry::{JobRegistry, LiveJob};
use crate::database::models::{StatusUpdate, StopReason};
use crate::database::repositories::StreamJobRepository;
use crate::database::retry::retry_on_sqlite_busy;
use crate::database::time::secs_until;

const FINAL_WRITE_ATTEMPTS: usize = 5;
const MONITOR_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Shared dependencies of every supervisor task.
pub(crate) struct SupervisorContext {
    pub repo: Arc<dyn StreamJobRepository>,
    pub registry: Arc<JobRegistry>,
    pub events: broadcast::Sender<JobEvent>,
    pub tick_interval: Duration,
    pub grace_period: Duration,
    /// Cancelled when the orchestrator detaches from its encoders.
    pub detach_token: CancellationToken,
}

#[derive(Debug, Clone, Copy)]
struct Outcome {
    reason: StopReason,
    exit_code: Option<i32>,
}

/// Supervise `job` until its encoder is gone, then write the final record.
pub(crate) async fn run_supervisor(ctx: Arc<SupervisorContext>, job: Arc<LiveJob>) {
    let Some(outcome) = supervise(&ctx, &job).await else {
        debug!(job_id = %job.job_id, "Supervisor detached, encoder left running");
        return;
    };

    job.mark_exited();
    write_final_status(&ctx, &job.job_id, outcome).await;

    if let Some(monitor) = job.take_monitor() {
        match tokio::time::timeout(MONITOR_DRAIN_TIMEOUT, monitor).await {
            Ok(Ok(stats)) => debug!(
                job_id = %job.job_id,
                lines_read = stats.lines_read,
                lines_flagged = stats.lines_flagged,
                "Failure monitor finished"
            ),
            Ok(Err(e)) => warn!(job_id = %job.job_id, "Failure monitor task failed: {}", e),
            Err(_) => debug!(job_id = %job.job_id, "Failure monitor still draining"),
        }
    }

    info!(
        job_id = %job.job_id,
        reason = %outcome.reason,
        exit_code = ?outcome.exit_code,
        runtime_secs = (Utc::now() - job.started_at).num_seconds(),
        "Job stopped"
    );
    let _ = ctx.events.send(JobEvent::Stopped {
        job_id: job.job_id.clone(),
        reason: outcome.reason,
        exit_code: outcome.exit_code,
    });
    ctx.registry.remove(&job.job_id);
}

/// The timer loop. Returns `None` when supervision was abandoned (detach).
async fn supervise(ctx: &SupervisorContext, job: &LiveJob) -> Option<Outcome> {
    let mut exit_rx = job.process.subscribe();
    let stop_token = job.stop_token();
    let mut ticker = interval(ctx.tick_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let state = *exit_rx.borrow();
        if state.has_exited() {
            return Some(exited(job, state));
        }

        tokio::select! {
            biased;

            _ = ctx.detach_token.cancelled() => return None,

            changed = exit_rx.changed() => {
                if changed.is_err() {
                    // Waiter is gone; its last published state is final.
                    let state = *exit_rx.borrow();
                    return Some(exited(job, ProcessState::Exited { code: state.exit_code() }));
                }
            }

            _ = stop_token.cancelled() => {
                let reason = job.stop_reason().unwrap_or(StopReason::StopRequested);
                let termination = job
                    .process
                    .terminate_with_grace(ctx.grace_period, true)
                    .await;
                log_forced(job, termination);
                return Some(Outcome {
                    reason,
                    exit_code: termination.state().exit_code(),
                });
            }

            _ = ticker.tick() => {
                let remaining = secs_until(job.expected_end_at, Utc::now());
                if remaining == 0 {
                    info!(job_id = %job.job_id, "Duration elapsed, stopping encoder");
                    job.request_stop(StopReason::Expired);
                    let termination = job
                        .process
                        .terminate_with_grace(ctx.grace_period, false)
                        .await;
                    log_forced(job, termination);
                    return Some(Outcome {
                        reason: job.stop_reason().unwrap_or(StopReason::Expired),
                        exit_code: termination.state().exit_code(),
                    });
                }

                job.set_remaining_secs(remaining);
                match ctx.repo.update_remaining(&job.job_id, remaining).await {
                    Ok(true) => {}
                    Ok(false) => debug!(job_id = %job.job_id, "Tick skipped, record no longer active"),
                    Err(e) => warn!(job_id = %job.job_id, "Failed to persist remaining time: {}", e),
                }
            }
        }
    }
}

fn exited(job: &LiveJob, state: ProcessState) -> Outcome {
    let reason = job.stop_reason().unwrap_or(StopReason::ProcessExited);
    if reason == StopReason::ProcessExited {
        warn!(
            job_id = %job.job_id,
            exit_code = ?state.exit_code(),
            "Encoder exited before its duration elapsed"
        );
    }
    Outcome {
        reason,
        exit_code: state.exit_code(),
    }
}

fn log_forced(job: &LiveJob, termination: Termination) {
    if let Termination::Forced(_) = termination {
        warn!(job_id = %job.job_id, "Encoder ignored SIGTERM and was killed");
    }
}

async fn write_final_status(ctx: &SupervisorContext, job_id: &str, outcome: Outcome) {
    let update = StatusUpdate::stopped(outcome.reason, outcome.exit_code);

    for attempt in 1..=FINAL_WRITE_ATTEMPTS {
        let result = retry_on_sqlite_busy("final status write", || {
            ctx.repo.apply_status(job_id, &update)
        })
        .await;

        match result {
            Ok(_) => return,
            Err(e) if attempt < FINAL_WRITE_ATTEMPTS => {
                warn!(job_id, attempt, "Final status write failed, retrying: {}", e);
                tokio::time::sleep(ctx.tick_interval).await;
            }
            Err(e) => {
                warn!(job_id, "Giving up on final status write: {}", e);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::database::repositories::MockStreamJobRepository;
    use crate::orchestrator::process::ProcessHandle;
    use std::process::Stdio;

    fn spawn_sleep(secs: &str) -> ProcessHandle {
        let child = tokio::process::Command::new("sleep")
            .arg(secs)
            .stdin(Stdio::null())
            .spawn()
            .unwrap();
        ProcessHandle::spawn(child)
    }

    fn context(repo: MockStreamJobRepository) -> (Arc<SupervisorContext>, broadcast::Receiver<JobEvent>) {
        let (events, rx) = broadcast::channel(16);
        let ctx = Arc::new(SupervisorContext {
            repo: Arc::new(repo),
            registry: Arc::new(JobRegistry::new()),
            events,
            tick_interval: Duration::from_millis(50),
            grace_period: Duration::from_secs(2),
            detach_token: CancellationToken::new(),
        });
        (ctx, rx)
    }

    fn register(ctx: &SupervisorContext, process: ProcessHandle, duration: chrono::Duration) -> Arc<LiveJob> {
        let now = Utc::now();
        ctx.registry
            .register(LiveJob::new(
                "job-1".into(),
                process,
                now,
                now + duration,
                duration.num_seconds(),
                None,
            ))
            .unwrap()
    }

    #[tokio::test]
    async fn test_expiry_stops_encoder() {
        let mut repo = MockStreamJobRepository::new();
        repo.expect_update_remaining().returning(|_, _| Ok(true));
        repo.expect_apply_status()
            .withf(|id, update| {
                id == "job-1"
                    && *update == StatusUpdate::stopped(StopReason::Expired, update.exit_code)
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let (ctx, mut rx) = context(repo);
        let job = register(&ctx, spawn_sleep("30"), chrono::Duration::milliseconds(300));

        run_supervisor(ctx.clone(), job.clone()).await;

        assert!(job.process.has_exited());
        assert!(ctx.registry.is_empty());
        assert!(matches!(
            rx.recv().await.unwrap(),
            JobEvent::Stopped { reason: StopReason::Expired, .. }
        ));
    }

    #[tokio::test]
    async fn test_unexpected_exit_records_exit_code() {
        let mut repo = MockStreamJobRepository::new();
        repo.expect_update_remaining().returning(|_, _| Ok(true));
        repo.expect_apply_status()
            .withf(|_, update| {
                *update == StatusUpdate::stopped(StopReason::ProcessExited, Some(7))
            })
            .times(1)
            .returning(|_, _| Ok(true));

        let (ctx, _rx) = context(repo);
        let child = tokio::process::Command::new("sh")
            .args(["-c", "sleep 0.2; exit 7"])
            .spawn()
            .unwrap();
        let job = register(&ctx, ProcessHandle::spawn(child), chrono::Duration::seconds(60));

        run_supervisor(ctx, job).await;
    }

    #[tokio::test]
    async fn test_stop_request_wakes_timer() {
        let mut repo = MockStreamJobRepository::new();
        repo.expect_update_remaining().returning(|_, _| Ok(true));
        repo.expect_apply_status()
            .withf(|_, update| update.stop_reason == Some(StopReason::StopRequested))
            .times(1)
            .returning(|_, _| Ok(true));

        let (ctx, _rx) = context(repo);
        let job = register(&ctx, spawn_sleep("30"), chrono::Duration::seconds(60));
        let task = tokio::spawn(run_supervisor(ctx, job.clone()));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert!(job.request_stop(StopReason::StopRequested));
        job.process.terminate();

        tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(job.process.has_exited());
    }

    #[tokio::test]
    async fn test_tick_errors_do_not_end_supervision() {
        let mut repo = MockStreamJobRepository::new();
        repo.expect_update_remaining()
            .returning(|_, _| Err(crate::Error::Database("locked".into())));
        repo.expect_apply_status().times(1).returning(|_, _| Ok(true));

        let (ctx, _rx) = context(repo);
        let job = register(&ctx, spawn_sleep("30"), chrono::Duration::milliseconds(400));

        run_supervisor(ctx, job.clone()).await;
        assert!(job.process.has_exited());
    }

    #[tokio::test]
    async fn test_detach_leaves_encoder_running() {
        let mut repo = MockStreamJobRepository::new();
        repo.expect_update_remaining().returning(|_, _| Ok(true));
        repo.expect_apply_status().never();

        let (ctx, _rx) = context(repo);
        let job = register(&ctx, spawn_sleep("30"), chrono::Duration::seconds(60));
        ctx.detach_token.cancel();

        run_supervisor(ctx, job.clone()).await;
        assert!(!job.process.has_exited());
        job.process.kill();
        job.process.wait().await;
    }
}
