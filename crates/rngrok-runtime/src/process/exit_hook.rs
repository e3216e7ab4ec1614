//! Process-wide cleanup of agent trees when the host is told to terminate.
//!
//! `Drop` and `kill_on_drop` never run when the host dies from SIGTERM or
//! SIGINT, and the agent sits in its own process group, so a terminal Ctrl-C
//! does not reach it either. Every spawned agent is therefore registered
//! here; a single listener task kills all registered trees on the first
//! termination signal and then exits the host with the conventional
//! `128 + signal` status.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, LazyLock, Mutex, PoisonError, Weak};

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::handle::ProcessHandle;

struct Registry {
    next_id: u64,
    handles: HashMap<u64, Weak<ProcessHandle>>,
    listener: Option<JoinHandle<()>>,
}

static REGISTRY: LazyLock<Mutex<Registry>> = LazyLock::new(|| {
    Mutex::new(Registry {
        next_id: 0,
        handles: HashMap::new(),
        listener: None,
    })
});

fn registry() -> std::sync::MutexGuard<'static, Registry> {
    REGISTRY.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registration of one agent process. Dropping it unregisters the process.
#[derive(Debug)]
pub struct ExitHookGuard {
    id: u64,
}

impl Drop for ExitHookGuard {
    fn drop(&mut self) {
        registry().handles.remove(&self.id);
    }
}

/// Register `handle` for teardown on host termination.
///
/// Must be called from within a tokio runtime. The listener is (re)installed
/// when none is running, e.g. after the runtime that owned it shut down.
pub fn register(handle: &Arc<ProcessHandle>) -> ExitHookGuard {
    let mut registry = registry();
    let id = registry.next_id;
    registry.next_id += 1;
    registry.handles.insert(id, Arc::downgrade(handle));

    if registry.listener.as_ref().is_none_or(JoinHandle::is_finished) {
        match spawn_listener() {
            Ok(task) => registry.listener = Some(task),
            Err(e) => warn!(error = %e, "Failed to install agent exit hook"),
        }
    }

    debug!(pid = handle.pid(), "Registered agent exit hook");
    ExitHookGuard { id }
}

/// Kill every registered agent tree now. Safe to call repeatedly.
pub fn kill_registered() {
    let handles: Vec<Arc<ProcessHandle>> = registry()
        .handles
        .values()
        .filter_map(Weak::upgrade)
        .collect();

    for handle in handles {
        handle.kill_now();
    }
}

#[cfg(unix)]
fn spawn_listener() -> io::Result<JoinHandle<()>> {
    use nix::sys::signal::Signal;
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    let mut interrupt = signal(SignalKind::interrupt())?;

    Ok(tokio::spawn(async move {
        let received = tokio::select! {
            Some(()) = terminate.recv() => Signal::SIGTERM,
            Some(()) = interrupt.recv() => Signal::SIGINT,
            else => return,
        };

        info!(signal = ?received, "Host terminating, killing agent processes");
        kill_registered();
        std::process::exit(128 + received as i32);
    }))
}

#[cfg(not(unix))]
fn spawn_listener() -> io::Result<JoinHandle<()>> {
    Ok(tokio::spawn(async {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Host interrupted, killing agent processes");
            kill_registered();
            std::process::exit(130);
        }
    }))
}

#[cfg(test)]
fn is_registered(guard: &ExitHookGuard) -> bool {
    registry().handles.contains_key(&guard.id)
}
