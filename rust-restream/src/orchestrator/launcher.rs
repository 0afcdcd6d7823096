//! Encoder launcher.
//!
//! Checks the launch preconditions for a job, builds the ffmpeg command line
//! and spawns the encoder at reduced priority.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::ChildStderr;
use tracing::{debug, info, warn};

use super::process::ProcessHandle;
use crate::domain::StreamJob;
use crate::media::MediaLibrary;

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);
const SILENT_AUDIO_SOURCE: &str = "anullsrc=channel_layout=stereo:sample_rate=44100";

/// Reasons a job could not be launched. Each one leaves the job `FAILED`.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("source video not found: {reference}")]
    SourceNotFound { reference: String },

    #[error("encoder '{binary}' is not available: {reason}")]
    EncoderUnavailable { binary: String, reason: String },

    #[error("failed to launch encoder: {0}")]
    LaunchFailed(String),
}

/// Encoder settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderConfig {
    /// ffmpeg binary, as a name on `PATH` or a path.
    pub binary_path: String,
    /// ffprobe binary used for the audio probe.
    pub probe_path: String,
    /// `nice` level for the encoder. 0 disables the wrapper.
    pub nice_level: i32,
    /// Codec for the generated silent track. Source audio is always copied.
    pub silent_audio_codec: String,
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            binary_path: "ffmpeg".to_string(),
            probe_path: "ffprobe".to_string(),
            nice_level: 5,
            silent_audio_codec: "aac".to_string(),
        }
    }
}

/// A freshly spawned encoder.
#[derive(Debug)]
pub struct LaunchedProcess {
    pub process: ProcessHandle,
    /// The encoder's stderr, to be handed to the failure monitor.
    pub stderr: Option<ChildStderr>,
    pub source_path: PathBuf,
    pub has_audio: bool,
}

/// Launches the encoder for a job.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, job: &StreamJob) -> Result<LaunchedProcess, LaunchError>;
}

/// ffmpeg-based [`Launcher`].
pub struct FfmpegLauncher {
    config: EncoderConfig,
    media: MediaLibrary,
}

impl FfmpegLauncher {
    pub fn new(config: EncoderConfig, media: MediaLibrary) -> Self {
        Self { config, media }
    }

    /// Whether the source carries at least one audio stream.
    ///
    /// A probe that cannot run counts as "no audio" so a track is always produced.
    async fn probe_has_audio(&self, source: &Path) -> bool {
        let mut cmd = process_utils::tokio_command(&self.config.probe_path);
        cmd.args([
            "-v",
            "error",
            "-select_streams",
            "a",
            "-show_entries",
            "stream=codec_type",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(source)
        .stdin(Stdio::null())
        .kill_on_drop(true);

        match tokio::time::timeout(PROBE_TIMEOUT, cmd.output()).await {
            Ok(Ok(output)) if output.status.success() => {
                String::from_utf8_lossy(&output.stdout)
                    .lines()
                    .any(|line| line.trim() == "audio")
            }
            Ok(Ok(output)) => {
                warn!(
                    source = %source.display(),
                    "Audio probe exited with {}, assuming no audio", output.status
                );
                false
            }
            Ok(Err(e)) => {
                warn!(source = %source.display(), "Audio probe failed to run ({}), assuming no audio", e);
                false
            }
            Err(_) => {
                warn!(source = %source.display(), "Audio probe timed out, assuming no audio");
                false
            }
        }
    }
}

#[async_trait]
impl Launcher for FfmpegLauncher {
    async fn launch(&self, job: &StreamJob) -> Result<LaunchedProcess, LaunchError> {
        let source = self
            .media
            .locate(&job.video_reference)
            .await
            .ok_or_else(|| LaunchError::SourceNotFound {
                reference: job.video_reference.clone(),
            })?;

        let encoder = process_utils::resolve_program(&self.config.binary_path).map_err(|e| {
            LaunchError::EncoderUnavailable {
                binary: self.config.binary_path.clone(),
                reason: e.to_string(),
            }
        })?;

        let has_audio = self.probe_has_audio(&source).await;
        let args = build_args(
            &source,
            has_audio,
            &self.config.silent_audio_codec,
            &job.destination_url,
            &job.stream_key,
        );
        debug!(job_id = %job.id, "ffmpeg args: {}", args.join(" "));

        let mut cmd = process_utils::low_priority_tokio_command(&encoder, self.config.nice_level);
        cmd.args(&args)
            .env("LC_ALL", "C")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|e| LaunchError::LaunchFailed(e.to_string()))?;
        let stderr = child.stderr.take();
        let process = ProcessHandle::spawn(child);

        info!(
            job_id = %job.id,
            pid = ?process.pid(),
            has_audio,
            "Encoder started for {}", source.display()
        );

        Ok(LaunchedProcess {
            process,
            stderr,
            source_path: source,
            has_audio,
        })
    }
}

/// RTMP target: `<destination>/<key>` without doubling a trailing slash.
pub fn publish_url(destination_url: &str, stream_key: &str) -> String {
    format!("{}/{}", destination_url.trim_end_matches('/'), stream_key)
}

/// Build the ffmpeg argument list for looping `source` to the destination.
pub fn build_args(
    source: &Path,
    has_audio: bool,
    silent_audio_codec: &str,
    destination_url: &str,
    stream_key: &str,
) -> Vec<String> {
    let mut args: Vec<String> = vec![
        "-hide_banner".into(),
        "-nostdin".into(),
        "-re".into(),
        "-y".into(),
        "-stream_loop".into(),
        "-1".into(),
        "-i".into(),
        source.to_string_lossy().into_owned(),
    ];

    if !has_audio {
        args.extend([
            "-f".into(),
            "lavfi".into(),
            "-i".into(),
            SILENT_AUDIO_SOURCE.into(),
            "-map".into(),
            "0:v:0".into(),
            "-map".into(),
            "1:a:0".into(),
        ]);
    }

    let audio_codec = if has_audio { "copy" } else { silent_audio_codec };
    args.extend([
        "-c:v".into(),
        "copy".into(),
        "-c:a".into(),
        audio_codec.into(),
        "-threads".into(),
        "0".into(),
        "-f".into(),
        "flv".into(),
        publish_url(destination_url, stream_key),
    ]);

    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StartJobRequest;

    fn job(reference: &str) -> StreamJob {
        let model = StartJobRequest::new("t", reference, "key", "rtmp://a.example/live2", 60)
            .validate()
            .unwrap()
            .into_db_model();
        StreamJob::try_from(model).unwrap()
    }

    #[test]
    fn test_publish_url_does_not_double_slash() {
        assert_eq!(publish_url("rtmp://h/live2/", "k"), "rtmp://h/live2/k");
        assert_eq!(publish_url("rtmp://h/live2", "k"), "rtmp://h/live2/k");
    }

    #[test]
    fn test_args_with_source_audio() {
        let args = build_args(Path::new("/v/a.mp4"), true, "aac", "rtmp://h/live2", "k");
        assert!(!args.iter().any(|a| a == "lavfi"));
        let pos = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[pos + 1], "copy");
        assert_eq!(args.last().unwrap(), "rtmp://h/live2/k");
        let loop_pos = args.iter().position(|a| a == "-stream_loop").unwrap();
        assert_eq!(args[loop_pos + 1], "-1");
    }

    #[test]
    fn test_args_with_silent_track() {
        let args = build_args(Path::new("/v/a.mp4"), false, "aac", "rtmp://h/live2", "k");
        assert!(args.iter().any(|a| a == SILENT_AUDIO_SOURCE));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a:0"));
        let pos = args.iter().position(|a| a == "-c:a").unwrap();
        assert_eq!(args[pos + 1], "aac");
    }

    #[tokio::test]
    async fn test_missing_source_fails_before_encoder_lookup() {
        let dir = tempfile::tempdir().unwrap();
        let launcher = FfmpegLauncher::new(
            EncoderConfig {
                binary_path: "definitely-not-an-encoder-binary".into(),
                ..Default::default()
            },
            MediaLibrary::new(dir.path()),
        );
        let err = launcher.launch(&job("missing.mp4")).await.unwrap_err();
        assert!(matches!(err, LaunchError::SourceNotFound { .. }));
    }

    #[tokio::test]
    async fn test_missing_encoder_is_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.mp4"), b"x").unwrap();
        let launcher = FfmpegLauncher::new(
            EncoderConfig {
                binary_path: "definitely-not-an-encoder-binary".into(),
                ..Default::default()
            },
            MediaLibrary::new(dir.path()),
        );
        let err = launcher.launch(&job("a.mp4")).await.unwrap_err();
        assert!(matches!(err, LaunchError::EncoderUnavailable { .. }));
    }
}
