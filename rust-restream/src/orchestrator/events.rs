//! Job lifecycle events.

use crate::database::models::StopReason;

/// Events emitted by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// Encoder launched and supervision started.
    Started { job_id: String, pid: Option<u32> },
    /// A launch precondition failed or the spawn failed.
    Failed { job_id: String, reason: String },
    /// The supervisor wrote the final `STOPPED` record.
    Stopped {
        job_id: String,
        reason: StopReason,
        exit_code: Option<i32>,
    },
    /// A record claimed to be active but no live encoder backs it.
    Orphaned { job_id: String },
    /// Record removed.
    Deleted { job_id: String },
}

impl JobEvent {
    pub fn job_id(&self) -> &str {
        match self {
            Self::Started { job_id, .. }
            | Self::Failed { job_id, .. }
            | Self::Stopped { job_id, .. }
            | Self::Orphaned { job_id }
            | Self::Deleted { job_id } => job_id,
        }
    }
}
