//! Stream job database models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::database::time::now_ms;

/// Stream job database model.
/// One row per broadcast job, keyed by id.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct StreamJobDbModel {
    pub id: String,
    pub title: String,
    /// Path of the source video relative to the media root
    pub video_reference: String,
    pub stream_key: String,
    pub destination_url: String,
    pub total_duration_secs: i64,
    /// Status: PENDING, RUNNING, STOPPED, FAILED, ORPHANED
    pub status: String,
    pub failure_reason: Option<String>,
    /// Stop reason: EXPIRED, STOP_REQUESTED, PROCESS_EXITED, SHUTDOWN
    pub stop_reason: Option<String>,
    pub exit_code: Option<i64>,
    pub remaining_secs: i64,
    /// Unix epoch ms
    pub started_at: Option<i64>,
    /// Unix epoch ms
    pub expected_end_at: Option<i64>,
    pub log_path: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl StreamJobDbModel {
    /// Create a new `PENDING` record with a fresh id.
    pub fn new(
        title: impl Into<String>,
        video_reference: impl Into<String>,
        stream_key: impl Into<String>,
        destination_url: impl Into<String>,
        total_duration_secs: i64,
    ) -> Self {
        let now = now_ms();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            title: title.into(),
            video_reference: video_reference.into(),
            stream_key: stream_key.into(),
            destination_url: destination_url.into(),
            total_duration_secs,
            status: JobStatus::Pending.as_str().to_string(),
            failure_reason: None,
            stop_reason: None,
            exit_code: None,
            remaining_secs: 0,
            started_at: None,
            expected_end_at: None,
            log_path: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Parsed status, `None` if the column holds an unknown value.
    pub fn job_status(&self) -> Option<JobStatus> {
        self.status.parse().ok()
    }
}

/// Job status values.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobStatus {
    /// Record created, launch not yet attempted or in flight.
    Pending,
    /// Encoder handle obtained; timer and monitor active.
    Running,
    /// Normal expiry, explicit stop, or encoder exit.
    Stopped,
    /// Precondition violation or launch error.
    Failed,
    /// Claimed to be active but no orchestrator instance owns a live handle.
    Orphaned,
}

impl JobStatus {
    /// Column value, as written by the strum derives.
    pub fn as_str(&self) -> &'static str {
        self.into()
    }

    /// Terminal jobs are only ever removed, never transitioned again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Failed | Self::Orphaned)
    }
}

/// Why a job reached `STOPPED`.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    strum::Display,
    strum::EnumString,
    strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopReason {
    /// The duration budget ran out.
    Expired,
    /// An explicit stop was requested.
    StopRequested,
    /// The encoder exited on its own before expiry.
    ProcessExited,
    /// The orchestrator shut down and stopped its jobs.
    Shutdown,
}

impl StopReason {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}

/// A status transition applied to one row in a single statement.
///
/// `status` and `remaining_secs` always travel together so a reader never sees
/// a terminal status next to a stale countdown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: JobStatus,
    pub remaining_secs: i64,
    pub failure_reason: Option<String>,
    pub stop_reason: Option<StopReason>,
    pub exit_code: Option<i32>,
}

impl StatusUpdate {
    pub fn stopped(reason: StopReason, exit_code: Option<i32>) -> Self {
        Self {
            status: JobStatus::Stopped,
            remaining_secs: 0,
            failure_reason: None,
            stop_reason: Some(reason),
            exit_code,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            remaining_secs: 0,
            failure_reason: Some(reason.into()),
            stop_reason: None,
            exit_code: None,
        }
    }

    pub fn orphaned() -> Self {
        Self {
            status: JobStatus::Orphaned,
            remaining_secs: 0,
            failure_reason: None,
            stop_reason: None,
            exit_code: None,
        }
    }
}
