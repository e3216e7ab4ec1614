//! Process-tree termination with SIGTERM → SIGKILL escalation.
//!
//! The agent may spawn helpers of its own, and those inherit its output
//! pipes. Leaving any of them alive keeps the monitor's stream open, so the
//! whole tree is signalled, not only the direct child.

use std::collections::{HashSet, VecDeque};
use std::io;
use std::process::ExitStatus;
use std::time::Duration;

use sysinfo::{ProcessesToUpdate, System};
use tokio::process::Child;
#[cfg(unix)]
use tokio::time::timeout;
use tracing::debug;

#[cfg(unix)]
use nix::errno::Errno;
#[cfg(unix)]
use nix::sys::signal::{self, Signal};

/// Collect the PIDs of every live descendant of `root`, parents before
/// children.
pub fn descendant_pids(root: u32) -> Vec<u32> {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut children_of: std::collections::HashMap<u32, Vec<u32>> =
        std::collections::HashMap::new();
    for (pid, process) in system.processes() {
        if let Some(parent) = process.parent() {
            children_of
                .entry(parent.as_u32())
                .or_default()
                .push(pid.as_u32());
        }
    }

    let mut found = Vec::new();
    let mut seen = HashSet::from([root]);
    let mut queue = VecDeque::from([root]);
    while let Some(pid) = queue.pop_front() {
        for &child in children_of.get(&pid).into_iter().flatten() {
            if seen.insert(child) {
                found.push(child);
                queue.push_back(child);
            }
        }
    }
    found
}

/// Ask a process to terminate. A process that is already gone is not an error.
pub fn terminate_pid(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        match signal::kill(nix_pid(pid), Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    #[cfg(not(unix))]
    {
        let pid = sysinfo::Pid::from_u32(pid);
        let mut system = System::new();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
        if let Some(process) = system.process(pid) {
            process.kill();
        }
        Ok(())
    }
}

/// Forcefully kill a process by PID. A process that is already gone is not
/// an error.
pub fn kill_pid(pid: u32) -> io::Result<()> {
    #[cfg(unix)]
    {
        match signal::kill(nix_pid(pid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::other(e)),
        }
    }

    #[cfg(not(unix))]
    {
        terminate_pid(pid)
    }
}

#[cfg(unix)]
#[allow(clippy::cast_possible_wrap)]
fn nix_pid(pid: u32) -> nix::unistd::Pid {
    nix::unistd::Pid::from_raw(pid as i32)
}

/// Signal every descendant of `root`, logging rather than returning failures.
pub fn terminate_descendants(root: u32) {
    for pid in descendant_pids(root) {
        debug!(root = root, pid = pid, "Terminating agent descendant");
        if let Err(e) = terminate_pid(pid) {
            debug!(pid = pid, error = %e, "Failed to signal agent descendant");
        }
    }
}

/// Gracefully shut down a child process, escalating to SIGKILL after `grace`.
///
/// # Strategy
/// 1. Send SIGTERM and wait up to `grace` for exit
/// 2. If still running, send SIGKILL
/// 3. Wait for reaping (required to avoid zombies)
///
/// On non-unix platforms the child is killed immediately.
pub async fn shutdown_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    if let Some(status) = child.try_wait()? {
        return Ok(status);
    }

    #[cfg(unix)]
    {
        let Some(pid) = child.id() else {
            return child.wait().await;
        };
        terminate_pid(pid)?;

        if let Ok(result) = timeout(grace, child.wait()).await {
            return result;
        }
        debug!(pid = pid, "Agent ignored SIGTERM, escalating to SIGKILL");
    }

    #[cfg(not(unix))]
    let _ = grace;

    child.kill().await?;
    child.wait().await
}
