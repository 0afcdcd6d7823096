//! Application configuration.
//!
//! Everything is read from environment variables (optionally loaded from a
//! `.env` file by the binary). Unset or blank variables fall back to defaults;
//! malformed values are a [`Error::Configuration`].

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::api::server::ApiServerConfig;
use crate::orchestrator::{EncoderConfig, OrchestratorConfig, ShutdownPolicy};
use crate::{Error, Result};

pub const DEFAULT_DATABASE_URL: &str = "sqlite:restream.db?mode=rwc";
pub const DEFAULT_MEDIA_ROOT: &str = "Video";
pub const DEFAULT_LOG_DIR: &str = "logs";

/// Top-level configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    /// Directory that video references resolve against.
    pub media_root: PathBuf,
    /// Directory for the application's own rolling logs.
    pub log_dir: PathBuf,
    pub orchestrator: OrchestratorConfig,
    pub encoder: EncoderConfig,
    pub api: ApiServerConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_url: DEFAULT_DATABASE_URL.to_string(),
            media_root: PathBuf::from(DEFAULT_MEDIA_ROOT),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            orchestrator: OrchestratorConfig::default(),
            encoder: EncoderConfig::default(),
            api: ApiServerConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` to resolve variable names.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let mut config = Self::default();

        if let Some(url) = var("DATABASE_URL") {
            config.database_url = url;
        }
        if let Some(root) = var("MEDIA_ROOT") {
            config.media_root = PathBuf::from(root);
        }
        if let Some(dir) = var("LOG_DIR") {
            config.log_dir = PathBuf::from(dir);
        }
        if let Some(dir) = var("JOB_LOG_DIR") {
            config.orchestrator.job_log_dir = PathBuf::from(dir);
        }

        if let Some(path) = var("FFMPEG_PATH") {
            config.encoder.binary_path = path;
        }
        if let Some(path) = var("FFPROBE_PATH") {
            config.encoder.probe_path = path;
        }
        if let Some(level) = var("ENCODER_NICE_LEVEL") {
            config.encoder.nice_level = parse("ENCODER_NICE_LEVEL", &level)?;
        }
        if let Some(codec) = var("SILENT_AUDIO_CODEC") {
            config.encoder.silent_audio_codec = codec;
        }

        if let Some(ms) = var("TICK_INTERVAL_MS") {
            config.orchestrator.tick_interval =
                Duration::from_millis(parse("TICK_INTERVAL_MS", &ms)?);
        }
        if let Some(secs) = var("STOP_GRACE_PERIOD_SECS") {
            config.orchestrator.grace_period =
                Duration::from_secs(parse("STOP_GRACE_PERIOD_SECS", &secs)?);
        }
        if let Some(policy) = var("SHUTDOWN_POLICY") {
            config.orchestrator.shutdown_policy = parse::<ShutdownPolicy>("SHUTDOWN_POLICY", &policy)?;
        }

        if let Some(addr) = var("API_BIND_ADDRESS") {
            config.api.bind_address = addr;
        }
        if let Some(port) = var("API_PORT") {
            config.api.port = parse("API_PORT", &port)?;
        }

        config.orchestrator.validate()?;
        Ok(config)
    }
}

fn parse<T>(key: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value
        .parse()
        .map_err(|e| Error::config(format!("{key}={value:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AppConfig> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.database_url, DEFAULT_DATABASE_URL);
        assert_eq!(config.media_root, PathBuf::from("Video"));
        assert_eq!(config.orchestrator.job_log_dir, PathBuf::from("Log"));
        assert_eq!(config.orchestrator.tick_interval, Duration::from_secs(1));
        assert_eq!(config.orchestrator.grace_period, Duration::from_secs(10));
        assert_eq!(config.orchestrator.shutdown_policy, ShutdownPolicy::StopJobs);
        assert_eq!(config.encoder.nice_level, 5);
        assert_eq!(config.api.port, 5000);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("MEDIA_ROOT", "/srv/video"),
            ("FFMPEG_PATH", "/opt/ffmpeg"),
            ("TICK_INTERVAL_MS", "250"),
            ("STOP_GRACE_PERIOD_SECS", "3"),
            ("SHUTDOWN_POLICY", "detach"),
            ("API_PORT", "8080"),
            ("ENCODER_NICE_LEVEL", "0"),
        ])
        .unwrap();
        assert_eq!(config.media_root, PathBuf::from("/srv/video"));
        assert_eq!(config.encoder.binary_path, "/opt/ffmpeg");
        assert_eq!(config.orchestrator.tick_interval, Duration::from_millis(250));
        assert_eq!(config.orchestrator.grace_period, Duration::from_secs(3));
        assert_eq!(config.orchestrator.shutdown_policy, ShutdownPolicy::Detach);
        assert_eq!(config.api.port, 8080);
        assert_eq!(config.encoder.nice_level, 0);
    }

    #[test]
    fn test_blank_values_use_defaults() {
        let config = load(&[("API_PORT", "  "), ("MEDIA_ROOT", "")]).unwrap();
        assert_eq!(config.api.port, 5000);
        assert_eq!(config.media_root, PathBuf::from("Video"));
    }

    #[test]
    fn test_malformed_values_rejected() {
        for vars in [
            [("API_PORT", "http")],
            [("TICK_INTERVAL_MS", "10000")],
            [("TICK_INTERVAL_MS", "0")],
            [("SHUTDOWN_POLICY", "explode")],
        ] {
            assert!(
                matches!(load(&vars), Err(Error::Configuration(_))),
                "{vars:?} should be rejected"
            );
        }
    }
}
