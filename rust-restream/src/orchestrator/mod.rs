//! Stream job orchestration.
//!
//! - [`launcher`]: precondition checks and encoder spawn.
//! - [`process`]: ownership of the encoder child process.
//! - [`monitor`]: stderr failure-line capture.
//! - [`records`]: `\n`/`\r` record splitting for encoder output.
//! - [`timer`]: per-job countdown, expiry and final record write.
//! - [`registry`]: live jobs owned by this instance.
//! - [`manager`]: the [`JobOrchestrator`] facade.

pub mod events;
pub mod launcher;
pub mod manager;
pub mod monitor;
pub mod process;
pub mod records;
pub mod registry;
mod timer;

pub use events::JobEvent;
pub use launcher::{EncoderConfig, FfmpegLauncher, LaunchError, LaunchedProcess, Launcher};
pub use manager::{JobOrchestrator, OrchestratorConfig, ShutdownPolicy};
pub use process::{ProcessHandle, ProcessState};
pub use registry::{JobRegistry, LiveJob, LiveState};
