//! Request and response bodies.

use serde::{Deserialize, Serialize};

use crate::metrics::ResourceUsage;

/// Response to an accepted start request.
#[derive(Debug, Serialize, Deserialize)]
pub struct StartJobResponse {
    pub id: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JobLogResponse {
    pub id: String,
    pub log_path: Option<String>,
    /// Flagged encoder lines, oldest first.
    pub lines: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
    pub live_jobs: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ResourceResponse {
    /// Absent if sampling failed.
    pub usage: Option<ResourceUsage>,
    pub live_jobs: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LogFilterResponse {
    pub filter: String,
}

#[derive(Debug, Deserialize)]
pub struct UpdateLogFilterRequest {
    pub filter: String,
}
