//! Stream job entity.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::database::models::{JobStatus, StopReason, StreamJobDbModel};
use crate::database::time::ms_to_datetime;
use crate::{Error, Result};

/// Lifecycle state of a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "failure_reason", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    Pending,
    Running,
    Stopped,
    Failed(String),
    Orphaned,
}

impl JobState {
    pub fn status(&self) -> JobStatus {
        match self {
            Self::Pending => JobStatus::Pending,
            Self::Running => JobStatus::Running,
            Self::Stopped => JobStatus::Stopped,
            Self::Failed(_) => JobStatus::Failed,
            Self::Orphaned => JobStatus::Orphaned,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status().is_terminal()
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Failed(reason) => write!(f, "FAILED ({reason})"),
            other => f.write_str(other.status().as_str()),
        }
    }
}

/// Read-only snapshot of a stream job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamJob {
    pub id: String,
    pub title: String,
    pub video_reference: String,
    pub stream_key: String,
    pub destination_url: String,
    pub total_duration_secs: u64,
    #[serde(flatten)]
    pub state: JobState,
    pub remaining_secs: u64,
    pub stop_reason: Option<StopReason>,
    pub exit_code: Option<i32>,
    pub started_at: Option<DateTime<Utc>>,
    pub expected_end_at: Option<DateTime<Utc>>,
    pub log_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl StreamJob {
    pub fn status(&self) -> JobStatus {
        self.state.status()
    }
}

impl TryFrom<StreamJobDbModel> for StreamJob {
    type Error = Error;

    fn try_from(model: StreamJobDbModel) -> Result<Self> {
        let status = model.job_status().ok_or_else(|| {
            Error::Database(format!(
                "job {} has unknown status '{}'",
                model.id, model.status
            ))
        })?;

        let state = match status {
            JobStatus::Pending => JobState::Pending,
            JobStatus::Running => JobState::Running,
            JobStatus::Stopped => JobState::Stopped,
            JobStatus::Failed => JobState::Failed(model.failure_reason.unwrap_or_default()),
            JobStatus::Orphaned => JobState::Orphaned,
        };

        Ok(Self {
            id: model.id,
            title: model.title,
            video_reference: model.video_reference,
            stream_key: model.stream_key,
            destination_url: model.destination_url,
            total_duration_secs: model.total_duration_secs.max(0) as u64,
            state,
            remaining_secs: model.remaining_secs.max(0) as u64,
            stop_reason: model.stop_reason.as_deref().and_then(|r| r.parse().ok()),
            exit_code: model.exit_code.and_then(|c| i32::try_from(c).ok()),
            started_at: model.started_at.map(ms_to_datetime),
            expected_end_at: model.expected_end_at.map(ms_to_datetime),
            log_path: model.log_path.map(PathBuf::from),
            created_at: ms_to_datetime(model.created_at),
            updated_at: ms_to_datetime(model.updated_at),
        })
    }
}

/// Raw parameters of a start request, as received from a caller.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StartJobRequest {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub video_reference: String,
    #[serde(default)]
    pub stream_key: String,
    #[serde(default)]
    pub destination_url: String,
    #[serde(default)]
    pub duration_secs: i64,
}

impl StartJobRequest {
    pub fn new(
        title: impl Into<String>,
        video_reference: impl Into<String>,
        stream_key: impl Into<String>,
        destination_url: impl Into<String>,
        duration_secs: i64,
    ) -> Self {
        Self {
            title: title.into(),
            video_reference: video_reference.into(),
            stream_key: stream_key.into(),
            destination_url: destination_url.into(),
            duration_secs,
        }
    }

    /// Check that every required field is present and the duration is positive.
    pub fn validate(self) -> Result<NewStreamJob> {
        let mut missing = Vec::new();
        for (name, value) in [
            ("title", &self.title),
            ("video_reference", &self.video_reference),
            ("stream_key", &self.stream_key),
            ("destination_url", &self.destination_url),
        ] {
            if value.trim().is_empty() {
                missing.push(name);
            }
        }
        if !missing.is_empty() {
            return Err(Error::validation(format!(
                "missing required field(s): {}",
                missing.join(", ")
            )));
        }

        if self.duration_secs <= 0 {
            return Err(Error::validation(format!(
                "duration_secs must be positive, got {}",
                self.duration_secs
            )));
        }

        Ok(NewStreamJob {
            title: self.title.trim().to_string(),
            video_reference: self.video_reference.trim().to_string(),
            stream_key: self.stream_key.trim().to_string(),
            destination_url: self.destination_url.trim().to_string(),
            duration_secs: self.duration_secs as u64,
        })
    }
}

/// A validated start request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewStreamJob {
    pub title: String,
    pub video_reference: String,
    pub stream_key: String,
    pub destination_url: String,
    pub duration_secs: u64,
}

impl NewStreamJob {
    pub fn into_db_model(self) -> StreamJobDbModel {
        StreamJobDbModel::new(
            self.title,
            self.video_reference,
            self.stream_key,
            self.destination_url,
            i64::try_from(self.duration_secs).unwrap_or(i64::MAX),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn request() -> StartJobRequest {
        StartJobRequest::new("Title", "loop.mp4", "key", "rtmp://a.example/live2", 3600)
    }

    #[test]
    fn test_valid_request() {
        let job = request().validate().unwrap();
        assert_eq!(job.duration_secs, 3600);
        assert_eq!(job.video_reference, "loop.mp4");
    }

    #[rstest]
    #[case::zero(0)]
    #[case::negative(-5)]
    fn test_non_positive_duration_rejected(#[case] duration: i64) {
        let mut req = request();
        req.duration_secs = duration;
        assert!(matches!(req.validate(), Err(Error::Validation(_))));
    }

    #[test]
    fn test_missing_fields_are_listed() {
        let mut req = request();
        req.stream_key = "  ".to_string();
        req.title = String::new();
        let Err(Error::Validation(msg)) = req.validate() else {
            panic!("expected validation error");
        };
        assert!(msg.contains("title"));
        assert!(msg.contains("stream_key"));
    }

    #[test]
    fn test_failed_state_carries_reason() {
        let mut model = request().validate().unwrap().into_db_model();
        model.status = "FAILED".to_string();
        model.failure_reason = Some("source not found".to_string());
        let job = StreamJob::try_from(model).unwrap();
        assert_eq!(job.state, JobState::Failed("source not found".to_string()));
        assert!(job.state.is_terminal());

        let json = serde_json::to_value(&job).unwrap();
        assert_eq!(json["status"], "FAILED");
        assert_eq!(json["failure_reason"], "source not found");
    }

    #[test]
    fn test_unknown_status_is_an_error() {
        let mut model = request().validate().unwrap().into_db_model();
        model.status = "LIVE: loop.mp4".to_string();
        assert!(StreamJob::try_from(model).is_err());
    }
}
