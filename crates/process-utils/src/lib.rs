//! Small process-related helpers shared across the workspace.
//!
//! Spawning helpers for long-running external encoders, plus a graceful
//! termination request that callers escalate to a kill themselves.

use std::ffi::{OsStr, OsString};
use std::io;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Resolve a program name (or path) to an executable path.
///
/// Plain names are looked up on `PATH`; names containing a path separator are
/// checked in place.
pub fn resolve_program(program: impl AsRef<OsStr>) -> io::Result<std::path::PathBuf> {
    which::which(program.as_ref()).map_err(|e| {
        io::Error::new(
            io::ErrorKind::NotFound,
            format!("{}: {}", program.as_ref().to_string_lossy(), e),
        )
    })
}

/// Build the program + leading arguments that run `program` at a reduced
/// scheduling priority.
///
/// On unix this prefixes the invocation with `nice -n<level>` when `nice` can
/// be resolved. `nice` execs the target, so the spawned pid is the target's
/// pid. Elsewhere, or when `nice` is missing or `level` is 0, the program is
/// returned unchanged.
pub fn low_priority_invocation(program: impl AsRef<OsStr>, level: i32) -> (OsString, Vec<OsString>) {
    let program = program.as_ref().to_os_string();

    #[cfg(unix)]
    {
        if level != 0
            && let Ok(nice) = which::which("nice")
        {
            return (nice.into_os_string(), vec![format!("-n{level}").into(), program]);
        }
    }

    #[cfg(not(unix))]
    let _ = level;

    (program, Vec::new())
}

/// Ask the process with the given pid to terminate gracefully.
///
/// Sends `SIGTERM` on unix. On other targets there is no graceful signal and
/// an `Unsupported` error is returned so callers can fall back to a kill.
pub fn send_terminate(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        use nix::sys::signal::{Signal, kill};
        use nix::unistd::Pid;

        let raw = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        kill(Pid::from_raw(raw), Signal::SIGTERM).map_err(io::Error::from)
    }

    #[cfg(not(unix))]
    {
        let _ = pid;
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "graceful termination is not supported on this platform",
        ))
    }
}

/// Create a `tokio::process::Command` that opens no console window on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    #[allow(unused_mut)]
    let mut cmd = tokio::process::Command::new(program);
    #[cfg(windows)]
    cmd.creation_flags(CREATE_NO_WINDOW);
    cmd
}

/// Create a `tokio::process::Command` that runs `program` at a reduced
/// priority. See [`low_priority_invocation`].
#[cfg(feature = "tokio")]
pub fn low_priority_tokio_command(program: impl AsRef<OsStr>, level: i32) -> tokio::process::Command {
    let (program, leading) = low_priority_invocation(program, level);
    let mut cmd = tokio_command(program);
    cmd.args(leading);
    cmd
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_level_runs_program_directly() {
        let (program, leading) = low_priority_invocation("ffmpeg", 0);
        assert_eq!(program, OsString::from("ffmpeg"));
        assert!(leading.is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn positive_level_wraps_with_nice_when_available() {
        let (program, leading) = low_priority_invocation("ffmpeg", 5);
        if which::which("nice").is_ok() {
            assert!(program.to_string_lossy().ends_with("nice"));
            assert_eq!(leading, vec![OsString::from("-n5"), OsString::from("ffmpeg")]);
        } else {
            assert_eq!(program, OsString::from("ffmpeg"));
        }
    }

    #[test]
    fn resolve_missing_program_fails() {
        let err = resolve_program("definitely-not-a-real-binary-7f3a").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn terminate_stops_a_sleeping_child() {
        let mut child = std::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        send_terminate(child.id()).expect("send SIGTERM");
        let status = child.wait().expect("wait for sleep");
        assert!(!status.success());
    }
}
