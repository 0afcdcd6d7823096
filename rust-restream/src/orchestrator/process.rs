//! Handle to a running encoder process.
//!
//! The `Child` is owned by a waiter task that reaps it and publishes the exit
//! through a watch channel. Everyone else holds a [`ProcessHandle`], which can
//! observe the exit, ask for a graceful stop (SIGTERM), or force a kill.

use std::time::Duration;

use tokio::process::Child;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Liveness of the process as seen by the waiter task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    /// `code` is `None` when the process was terminated by a signal.
    Exited { code: Option<i32> },
}

impl ProcessState {
    pub fn has_exited(&self) -> bool {
        matches!(self, Self::Exited { .. })
    }

    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Exited { code } => *code,
            Self::Running => None,
        }
    }
}

/// How a requested termination finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Termination {
    /// The process exited within the grace period.
    Graceful(ProcessState),
    /// The grace period ran out and the process was killed.
    Forced(ProcessState),
}

impl Termination {
    pub fn state(&self) -> ProcessState {
        match self {
            Self::Graceful(state) | Self::Forced(state) => *state,
        }
    }
}

/// Shared handle to a spawned encoder.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: Option<u32>,
    state_rx: watch::Receiver<ProcessState>,
    kill_token: CancellationToken,
}

impl ProcessHandle {
    /// Take ownership of `child` and spawn the task that waits for it.
    ///
    /// Take any piped stdio from the child before calling this.
    pub fn spawn(child: Child) -> Self {
        let pid = child.id();
        let kill_token = CancellationToken::new();
        let state_rx = spawn_process_waiter(child, kill_token.clone());
        Self {
            pid,
            state_rx,
            kill_token,
        }
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn state(&self) -> ProcessState {
        *self.state_rx.borrow()
    }

    pub fn has_exited(&self) -> bool {
        self.state().has_exited()
    }

    /// A receiver that changes exactly once, when the process exits.
    pub fn subscribe(&self) -> watch::Receiver<ProcessState> {
        self.state_rx.clone()
    }

    /// Ask the process to exit (SIGTERM). Falls back to a kill where no
    /// graceful signal exists. Returns `false` if the process had already exited.
    pub fn terminate(&self) -> bool {
        if self.has_exited() {
            return false;
        }
        let Some(pid) = self.pid else {
            self.kill();
            return true;
        };
        if let Err(e) = process_utils::send_terminate(pid) {
            warn!(pid, "Graceful termination failed ({}), killing instead", e);
            self.kill();
        }
        true
    }

    /// Force-kill the process. The waiter task reaps it.
    pub fn kill(&self) {
        self.kill_token.cancel();
    }

    /// Wait until the process exits.
    pub async fn wait(&self) -> ProcessState {
        let mut rx = self.state_rx.clone();
        let result = rx.wait_for(ProcessState::has_exited).await.map(|state| *state);
        match result {
            Ok(state) => state,
            // The waiter is gone; whatever it last published is final.
            Err(_) => *rx.borrow(),
        }
    }

    /// Wait up to `timeout` for the process to exit.
    pub async fn wait_timeout(&self, timeout: Duration) -> Option<ProcessState> {
        tokio::time::timeout(timeout, self.wait())
            .await
            .ok()
            .filter(ProcessState::has_exited)
    }

    /// Send SIGTERM, wait up to `grace`, then kill if the process is still alive.
    ///
    /// With `signal_sent` the SIGTERM step is skipped (a caller already sent it).
    pub async fn terminate_with_grace(&self, grace: Duration, signal_sent: bool) -> Termination {
        if self.has_exited() {
            return Termination::Graceful(self.state());
        }
        if !signal_sent {
            self.terminate();
        }
        if let Some(state) = self.wait_timeout(grace).await {
            return Termination::Graceful(state);
        }

        warn!(
            pid = ?self.pid,
            "Process did not exit within {:?} of SIGTERM, killing", grace
        );
        self.kill();
        Termination::Forced(self.wait().await)
    }
}

/// Spawn a task that waits for a process to exit and publishes the result.
///
/// If `kill_token` is cancelled first, the process is killed and reaped.
fn spawn_process_waiter(
    mut child: Child,
    kill_token: CancellationToken,
) -> watch::Receiver<ProcessState> {
    let (tx, rx) = watch::channel(ProcessState::Running);

    tokio::spawn(async move {
        let status = tokio::select! {
            _ = kill_token.cancelled() => {
                if let Err(e) = child.kill().await {
                    debug!("Kill after cancellation failed: {}", e);
                }
                child.wait().await
            }
            status = child.wait() => status,
        };

        let code = match status {
            Ok(exit_status) => {
                if let Some(c) = exit_status.code()
                    && c != 0
                {
                    warn!("Process exited with code: {}", c);
                }
                exit_status.code()
            }
            Err(e) => {
                error!("Error waiting for process: {}", e);
                Some(-1)
            }
        };

        let _ = tx.send(ProcessState::Exited { code });
    });

    rx
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::process::Stdio;

    fn spawn_sh(script: &str) -> ProcessHandle {
        let child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn sh");
        ProcessHandle::spawn(child)
    }

    #[tokio::test]
    async fn test_exit_code_is_published() {
        let handle = spawn_sh("exit 3");
        let state = handle.wait().await;
        assert_eq!(state, ProcessState::Exited { code: Some(3) });
        assert!(handle.has_exited());
        assert!(!handle.terminate());
    }

    #[tokio::test]
    async fn test_wait_is_repeatable_after_exit() {
        let handle = spawn_sh("exit 0");
        let first = handle.wait().await;
        let second = handle.wait_timeout(Duration::from_secs(1)).await;
        assert_eq!(first, ProcessState::Exited { code: Some(0) });
        assert_eq!(second, Some(first));
    }

    #[tokio::test]
    async fn test_sigterm_stops_cooperative_process() {
        let handle = spawn_sh("exec sleep 30");
        assert!(!handle.has_exited());
        let outcome = handle
            .terminate_with_grace(Duration::from_secs(5), false)
            .await;
        assert!(matches!(outcome, Termination::Graceful(_)));
        assert!(handle.has_exited());
    }

    #[tokio::test]
    async fn test_ignored_sigterm_escalates_to_kill() {
        let handle = spawn_sh("trap '' TERM; while :; do sleep 0.1; done");
        // Give the shell a moment to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;
        let outcome = handle
            .terminate_with_grace(Duration::from_millis(500), false)
            .await;
        assert!(matches!(outcome, Termination::Forced(_)));
        assert!(outcome.state().has_exited());
    }
}
