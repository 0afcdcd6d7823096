//! In-memory registry of jobs owned by this orchestrator instance.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU8, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::monitor::MonitorStats;
use super::process::ProcessHandle;
use crate::database::models::StopReason;
use crate::{Error, Result};

/// Supervision state of a live job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LiveState {
    Running = 0,
    /// A stop was requested; the encoder is inside its grace period.
    Stopping = 1,
    /// The encoder has exited; the final record write may still be pending.
    Exited = 2,
}

impl LiveState {
    fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Running,
            1 => Self::Stopping,
            _ => Self::Exited,
        }
    }
}

/// A job with a live encoder.
pub struct LiveJob {
    pub job_id: String,
    pub process: Arc<ProcessHandle>,
    pub started_at: DateTime<Utc>,
    pub expected_end_at: DateTime<Utc>,
    pub log_path: Option<PathBuf>,
    state: AtomicU8,
    remaining_secs: AtomicI64,
    stop_token: CancellationToken,
    stop_reason: Mutex<Option<StopReason>>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
    monitor: Mutex<Option<JoinHandle<MonitorStats>>>,
}

impl LiveJob {
    pub fn new(
        job_id: String,
        process: ProcessHandle,
        started_at: DateTime<Utc>,
        expected_end_at: DateTime<Utc>,
        remaining_secs: i64,
        log_path: Option<PathBuf>,
    ) -> Self {
        Self {
            job_id,
            process: Arc::new(process),
            started_at,
            expected_end_at,
            log_path,
            state: AtomicU8::new(LiveState::Running as u8),
            remaining_secs: AtomicI64::new(remaining_secs),
            stop_token: CancellationToken::new(),
            stop_reason: Mutex::new(None),
            supervisor: Mutex::new(None),
            monitor: Mutex::new(None),
        }
    }

    pub fn state(&self) -> LiveState {
        let state = LiveState::from_u8(self.state.load(Ordering::Acquire));
        if state != LiveState::Exited && self.process.has_exited() {
            LiveState::Exited
        } else {
            state
        }
    }

    pub fn mark_exited(&self) {
        self.state.store(LiveState::Exited as u8, Ordering::Release);
    }

    pub fn remaining_secs(&self) -> i64 {
        if self.state() == LiveState::Exited {
            0
        } else {
            self.remaining_secs.load(Ordering::Acquire)
        }
    }

    pub fn set_remaining_secs(&self, secs: i64) {
        self.remaining_secs.store(secs, Ordering::Release);
    }

    /// Flag the job as stopping and wake its timer.
    ///
    /// The first accepted reason wins. Returns `false` if a stop was already
    /// requested or the process exited; in that case no reason is recorded.
    pub fn request_stop(&self, reason: StopReason) -> bool {
        let swapped = self
            .state
            .compare_exchange(
                LiveState::Running as u8,
                LiveState::Stopping as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok();
        let accepted = swapped && !self.process.has_exited();
        if accepted {
            self.stop_reason.lock().get_or_insert(reason);
        }
        self.stop_token.cancel();
        accepted
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_token.is_cancelled()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        *self.stop_reason.lock()
    }

    pub fn stop_token(&self) -> CancellationToken {
        self.stop_token.clone()
    }

    pub fn set_supervisor(&self, handle: JoinHandle<()>) {
        *self.supervisor.lock() = Some(handle);
    }

    pub fn take_supervisor(&self) -> Option<JoinHandle<()>> {
        self.supervisor.lock().take()
    }

    pub fn set_monitor(&self, handle: JoinHandle<MonitorStats>) {
        *self.monitor.lock() = Some(handle);
    }

    pub fn take_monitor(&self) -> Option<JoinHandle<MonitorStats>> {
        self.monitor.lock().take()
    }
}

impl std::fmt::Debug for LiveJob {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LiveJob")
            .field("job_id", &self.job_id)
            .field("pid", &self.process.pid())
            .field("state", &self.state())
            .field("remaining_secs", &self.remaining_secs())
            .finish()
    }
}

/// Registry of live jobs keyed by job id.
#[derive(Debug, Default)]
pub struct JobRegistry {
    jobs: DashMap<String, Arc<LiveJob>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: LiveJob) -> Result<Arc<LiveJob>> {
        use dashmap::mapref::entry::Entry;

        match self.jobs.entry(job.job_id.clone()) {
            Entry::Occupied(_) => Err(Error::invalid_state(job.job_id, "RUNNING", "register")),
            Entry::Vacant(slot) => {
                let job = Arc::new(job);
                slot.insert(job.clone());
                Ok(job)
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<LiveJob>> {
        self.jobs.get(id).map(|entry| entry.value().clone())
    }

    pub fn remove(&self, id: &str) -> Option<Arc<LiveJob>> {
        self.jobs.remove(id).map(|(_, job)| job)
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn snapshot(&self) -> Vec<Arc<LiveJob>> {
        self.jobs.iter().map(|entry| entry.value().clone()).collect()
    }
}
