//! Ownership wrapper around the spawned agent child process.

use std::io;
use std::process::ExitStatus;
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use tokio::process::{Child, Command};
use tracing::{debug, warn};

use super::shutdown::{kill_pid, shutdown_child, terminate_descendants};
use super::stream::{LineStream, merged_output};

/// Liveness view of a process, shared with observers that must not control it.
pub trait ProcessLiveness: Send + Sync {
    fn is_alive(&self) -> bool;
}

/// The agent child process.
///
/// Owned by the supervisor, which alone starts and stops it. The monitor
/// only ever holds a `Weak` reference through [`ProcessLiveness`].
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Mutex<Option<Child>>,
}

impl ProcessHandle {
    /// Spawn `command` with piped output and return the handle together with
    /// the merged stdout/stderr line stream.
    pub fn spawn(command: &mut Command) -> io::Result<(Self, LineStream)> {
        command
            .stdin(std::process::Stdio::null())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn()?;
        let pid = child
            .id()
            .ok_or_else(|| io::Error::other("spawned agent has no PID"))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| io::Error::other("agent stdout was not captured"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| io::Error::other("agent stderr was not captured"))?;

        let handle = Self {
            pid,
            child: Mutex::new(Some(child)),
        };
        Ok((handle, merged_output(stdout, stderr)))
    }

    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Exit status, if the process has exited and been reaped.
    pub fn try_status(&self) -> Option<ExitStatus> {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        guard.as_mut().and_then(|child| child.try_wait().ok().flatten())
    }

    /// Terminate the process tree: descendants first, then the child itself
    /// (SIGTERM, then SIGKILL after `grace`), then reap it.
    ///
    /// Idempotent; a second call finds nothing to do. Failures are logged,
    /// never returned.
    pub async fn terminate(&self, grace: Duration) {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else {
            return;
        };

        terminate_descendants(self.pid);
        match shutdown_child(&mut child, grace).await {
            Ok(status) => debug!(pid = self.pid, %status, "Agent process exited"),
            Err(e) => warn!(pid = self.pid, error = %e, "Failed to shut down agent process"),
        }
    }

    /// Synchronous best-effort kill of the whole tree, for use from `Drop`.
    pub fn kill_now(&self) {
        let child = self
            .child
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut child) = child else {
            return;
        };

        terminate_descendants(self.pid);
        if let Err(e) = kill_pid(self.pid) {
            debug!(pid = self.pid, error = %e, "Failed to kill agent process");
        }
        // Reap if already possible; kill_on_drop covers the rest
        let _ = child.try_wait();
    }
}

impl ProcessLiveness for ProcessHandle {
    fn is_alive(&self) -> bool {
        let mut guard = self.child.lock().unwrap_or_else(PoisonError::into_inner);
        match guard.as_mut() {
            Some(child) => matches!(child.try_wait(), Ok(None)),
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    #[cfg(unix)]
    async fn test_spawn_streams_both_outputs() {
        let mut command = Command::new("sh");
        command.arg("-c").arg("echo out; echo err 1>&2");
        let (handle, lines) = ProcessHandle::spawn(&mut command).unwrap();
        assert!(handle.pid() > 0);

        let mut lines: Vec<String> = lines.map(|l| l.unwrap()).collect().await;
        lines.sort();
        assert_eq!(lines, vec!["err", "out"]);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_terminate_is_idempotent() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let (handle, _lines) = ProcessHandle::spawn(&mut command).unwrap();
        assert!(handle.is_alive());

        handle.terminate(Duration::from_secs(5)).await;
        assert!(!handle.is_alive());
        handle.terminate(Duration::from_secs(5)).await;
        handle.kill_now();
        assert!(!handle.is_alive());
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn test_exit_is_observed() {
        let mut command = Command::new("true");
        let (handle, lines) = ProcessHandle::spawn(&mut command).unwrap();
        let _: Vec<_> = lines.collect().await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(!handle.is_alive());
        assert!(handle.try_status().is_some_and(|s| s.success()));
    }
}
