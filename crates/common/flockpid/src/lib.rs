//! PID-file backed daemon lifecycle, shared by the relay and the bridge.
//!
//! Unlike a `flock(2)`-based exclusion lock, daemon mode here is a
//! decimal PID written to a well-known path under
//! `<home>/.myndhyve-cli/`, probed with signal 0 on `status`/`start` and
//! torn down with SIGTERM on `stop`. Both files are mode 0600.

use std::fs::OpenOptions;
use std::path::Path;
use std::path::PathBuf;
use std::process::Command;
use std::process::Stdio;

use relay_utils::fs::atomic_write;
use relay_utils::signals::is_process_alive;
use relay_utils::signals::terminate;

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("another instance is already running with pid {pid}")]
    AlreadyRunning { pid: u32 },

    #[error("pid file at {path:?} does not contain a valid pid: {contents:?}")]
    CorruptPidFile { path: PathBuf, contents: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Fs(#[from] relay_utils::fs::FsError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonStatus {
    Running { pid: u32 },
    NotRunning,
}

/// Reads `pid_path`, probing liveness and removing a stale file.
pub fn status(pid_path: impl AsRef<Path>) -> Result<DaemonStatus, DaemonError> {
    let pid_path = pid_path.as_ref();
    let Some(pid) = read_pid(pid_path)? else {
        return Ok(DaemonStatus::NotRunning);
    };

    if is_process_alive(pid) {
        Ok(DaemonStatus::Running { pid })
    } else {
        tracing::debug!(%pid, path = ?pid_path, "removing stale pid file");
        let _ = std::fs::remove_file(pid_path);
        Ok(DaemonStatus::NotRunning)
    }
}

/// Spawns `program` detached: stdout/stderr appended to `log_path`, pid
/// written to `pid_path`. Refuses if a live process already owns the pid
/// file. `extra_env` is set on the child only, distinguishing daemon mode
/// from a foreground run (e.g. `MYNDHYVE_CLI_DAEMON=1`).
pub async fn start_detached(
    pid_path: impl AsRef<Path>,
    log_path: impl AsRef<Path>,
    program: &str,
    args: &[String],
    extra_env: &[(&str, &str)],
) -> Result<u32, DaemonError> {
    let pid_path = pid_path.as_ref();

    if let DaemonStatus::Running { pid } = status(pid_path)? {
        return Err(DaemonError::AlreadyRunning { pid });
    }

    let log_file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_path.as_ref())?;
    let log_file_err = log_file.try_clone()?;

    let child = Command::new(program)
        .args(args)
        .envs(extra_env.iter().copied())
        .stdin(Stdio::null())
        .stdout(Stdio::from(log_file))
        .stderr(Stdio::from(log_file_err))
        .spawn()?;

    let pid = child.id();
    atomic_write(pid_path, pid.to_string().as_bytes(), 0o600).await?;

    // `std::process::Child` is not killed on drop, so letting it go out of
    // scope here already un-references it: the daemon runs on its own
    // until `stop` sends it SIGTERM.
    drop(child);

    Ok(pid)
}

/// Sends SIGTERM to the owning process and removes the pid file. Stopping
/// an already-dead (or never-started) daemon is treated as success.
pub fn stop(pid_path: impl AsRef<Path>) -> Result<(), DaemonError> {
    let pid_path = pid_path.as_ref();
    if let Some(pid) = read_pid(pid_path)? {
        terminate(pid)?;
    }
    match std::fs::remove_file(pid_path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err.into()),
    }
}

/// Writes the current process's pid to `pid_path` (mode 0600). Used by a
/// foreground run that still wants `status`/`stop` to work against it.
pub async fn write_own_pid(pid_path: impl AsRef<Path>) -> Result<(), DaemonError> {
    atomic_write(
        pid_path.as_ref(),
        std::process::id().to_string().as_bytes(),
        0o600,
    )
    .await?;
    Ok(())
}

fn read_pid(pid_path: &Path) -> Result<Option<u32>, DaemonError> {
    let contents = match std::fs::read_to_string(pid_path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err.into()),
    };

    contents
        .trim()
        .parse::<u32>()
        .map(Some)
        .map_err(|_| DaemonError::CorruptPidFile {
            path: pid_path.to_path_buf(),
            contents,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn status_is_not_running_when_file_absent() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("relay.pid");
        assert_eq!(status(&pid_path).unwrap(), DaemonStatus::NotRunning);
    }

    #[test]
    fn status_reports_running_for_current_process() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("relay.pid");
        std::fs::write(&pid_path, std::process::id().to_string()).unwrap();

        assert_eq!(
            status(&pid_path).unwrap(),
            DaemonStatus::Running {
                pid: std::process::id()
            }
        );
    }

    #[test]
    fn status_removes_stale_pid_file() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("relay.pid");
        std::fs::write(&pid_path, (i32::MAX as u32 - 1).to_string()).unwrap();

        assert_eq!(status(&pid_path).unwrap(), DaemonStatus::NotRunning);
        assert!(!pid_path.exists());
    }

    #[test]
    fn stop_on_missing_pid_file_is_ok() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("relay.pid");
        assert!(stop(&pid_path).is_ok());
    }

    #[tokio::test]
    async fn start_detached_refuses_when_already_running() {
        let dir = tempdir().unwrap();
        let pid_path = dir.path().join("relay.pid");
        std::fs::write(&pid_path, std::process::id().to_string()).unwrap();

        let log_path = dir.path().join("relay.log");
        let err = start_detached(&pid_path, &log_path, "true", &[], &[])
            .await
            .unwrap_err();
        assert!(matches!(err, DaemonError::AlreadyRunning { .. }));
    }
}
