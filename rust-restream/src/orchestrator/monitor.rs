//! Encoder stderr monitor.
//!
//! Drains the encoder's stderr for the lifetime of the process and appends
//! lines that look like failures to the job's log file.

use std::path::{Path, PathBuf};

use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncRead, AsyncWriteExt};
use tracing::{debug, warn};

use super::records::RecordReader;

/// Case-insensitive keywords that flag a stderr line.
pub const FAILURE_KEYWORDS: [&str; 4] = ["error", "failed", "disconnect", "broken"];

/// Prefix written before every flagged line.
pub const FLAG_MARKER: &str = "[!!] ";

/// Counters reported when the stream closes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorStats {
    pub lines_read: u64,
    pub lines_flagged: u64,
}

pub fn is_failure_line(line: &str) -> bool {
    let lower = line.to_ascii_lowercase();
    FAILURE_KEYWORDS.iter().any(|k| lower.contains(k))
}

/// Lazily opened append-only job log. Gives up after the first I/O error.
struct FlaggedLog {
    path: Option<PathBuf>,
    file: Option<File>,
    failed: bool,
}

impl FlaggedLog {
    fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            file: None,
            failed: false,
        }
    }

    async fn append(&mut self, job_id: &str, line: &str) {
        if self.failed {
            return;
        }
        let Some(path) = self.path.as_deref() else {
            return;
        };

        if self.file.is_none() {
            match open_append(path).await {
                Ok(f) => self.file = Some(f),
                Err(e) => {
                    warn!(job_id, path = %path.display(), "Cannot open job log: {}", e);
                    self.failed = true;
                    return;
                }
            }
        }

        let Some(file) = self.file.as_mut() else {
            return;
        };
        let entry = format!("{FLAG_MARKER}{line}\n");
        let result = async {
            file.write_all(entry.as_bytes()).await?;
            file.flush().await
        }
        .await;
        if let Err(e) = result {
            warn!(job_id, path = %path.display(), "Cannot write job log: {}", e);
            self.failed = true;
        }
    }
}

async fn open_append(path: &Path) -> std::io::Result<File> {
    OpenOptions::new().create(true).append(true).open(path).await
}

/// Read `stderr` until EOF, appending flagged lines to `log_path`.
///
/// Never returns early on a log error: the pipe is always drained so the
/// encoder can never block on a full stderr buffer.
pub async fn run_failure_monitor<R>(job_id: String, stderr: R, log_path: Option<PathBuf>) -> MonitorStats
where
    R: AsyncRead + Unpin,
{
    let mut records = RecordReader::new(stderr);
    let mut log = FlaggedLog::new(log_path);
    let mut stats = MonitorStats::default();

    loop {
        let line = match records.next_record().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                debug!(job_id, "stderr read ended: {}", e);
                break;
            }
        };

        stats.lines_read += 1;
        if is_failure_line(&line) {
            stats.lines_flagged += 1;
            log.append(&job_id, &line).await;
        }
    }

    stats
}
