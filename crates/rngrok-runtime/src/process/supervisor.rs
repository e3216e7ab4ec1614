//! Agent process lifecycle: start, startup handshake, stop.

use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{Instant, sleep};
use tracing::{debug, info, warn};

use super::exit_hook::{self, ExitHookGuard};
use super::handle::{ProcessHandle, ProcessLiveness};
use super::monitor::{ProcessMonitor, Readiness};
use crate::command::build_start_command;
use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::health::{ApiStatusProbe, HttpStatusProbe};
use crate::log::{BoundedLogHistory, LogCallback, LogRecord};

/// How long a dead agent's remaining output is drained before the startup
/// error is built.
const EXIT_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

/// Supervisor for one agent process.
///
/// `start()` launches the agent and waits for its startup handshake;
/// `stop()` tears down the whole process tree. Both are serialized, so
/// concurrent callers see a consistent `stopped → starting → running →
/// stopped` sequence. Dropping the supervisor kills a still-running agent,
/// and so does the host receiving SIGTERM or SIGINT while it runs.
pub struct AgentProcess {
    config: AgentConfig,
    probe: Arc<dyn ApiStatusProbe>,
    lifecycle: Mutex<()>,
    handle: RwLock<Option<Arc<ProcessHandle>>>,
    monitor: RwLock<Option<ProcessMonitor>>,
    exit_hook: std::sync::Mutex<Option<ExitHookGuard>>,
    callback: RwLock<Option<LogCallback>>,
}

impl AgentProcess {
    /// Supervisor probing the agent API over HTTP.
    pub fn new(config: AgentConfig) -> AgentResult<Self> {
        let probe = HttpStatusProbe::new(config.probe_timeout(), &config.user_agent)?;
        Ok(Self::with_probe(config, Arc::new(probe)))
    }

    /// Supervisor with a custom readiness probe.
    pub fn with_probe(config: AgentConfig, probe: Arc<dyn ApiStatusProbe>) -> Self {
        Self {
            config,
            probe,
            lifecycle: Mutex::new(()),
            handle: RwLock::new(None),
            monitor: RwLock::new(None),
            exit_hook: std::sync::Mutex::new(None),
            callback: RwLock::new(None),
        }
    }

    pub const fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Start the agent and wait until it is healthy.
    ///
    /// Returns immediately when the agent is already running. On any startup
    /// failure the half-started agent is stopped before the error is
    /// returned; the error carries the logs captured so far.
    pub async fn start(&self) -> AgentResult<()> {
        let _lifecycle = self.lifecycle.lock().await;

        if self.is_running() {
            debug!(agent = %self.config.agent_path.display(), "Agent is already running");
            return Ok(());
        }
        // A previous agent may have exited on its own; release what it left
        self.stop_locked().await;

        self.check_paths()?;

        let mut command = build_start_command(&self.config);
        let (handle, lines) = ProcessHandle::spawn(&mut command).map_err(AgentError::Spawn)?;
        let handle = Arc::new(handle);
        debug!(pid = handle.pid(), "Agent process starting");
        *self.exit_hook.lock().unwrap_or_else(PoisonError::into_inner) =
            Some(exit_hook::register(&handle));

        let history = Arc::new(BoundedLogHistory::with_callback(
            self.config.max_logs,
            self.registered_callback(),
        ));
        let liveness: Arc<dyn ProcessLiveness> = handle.clone();
        let monitor = ProcessMonitor::spawn(
            lines,
            Arc::downgrade(&liveness),
            history,
            Arc::clone(&self.probe),
            &self.config,
        );

        *self.handle.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&handle));
        *self.monitor.write().unwrap_or_else(PoisonError::into_inner) = Some(monitor.clone());

        match self.await_startup(&handle, &monitor).await {
            Ok(()) => {
                info!(
                    pid = handle.pid(),
                    api_url = monitor.api_url().unwrap_or_default(),
                    "Agent process has started"
                );
                Ok(())
            }
            Err(e) => {
                warn!(pid = handle.pid(), error = %e, "Agent failed to start");
                self.stop_locked().await;
                Err(e)
            }
        }
    }

    fn check_paths(&self) -> AgentResult<()> {
        if !self.config.agent_path.exists() {
            return Err(AgentError::BinaryNotFound {
                path: self.config.agent_path.clone(),
            });
        }
        if let Some(config_path) = &self.config.config_path {
            if !config_path.exists() {
                return Err(AgentError::ConfigNotFound {
                    path: config_path.clone(),
                });
            }
        }
        Ok(())
    }

    /// Poll readiness until ready, timeout, process death, a read error, or
    /// the security condition.
    async fn await_startup(
        &self,
        handle: &ProcessHandle,
        monitor: &ProcessMonitor,
    ) -> AgentResult<()> {
        let deadline = Instant::now() + self.config.startup_timeout();

        loop {
            if monitor.check_readiness().await? == Readiness::Ready {
                return Ok(());
            }
            if monitor.read_error().is_some() {
                break;
            }
            if !handle.is_alive() {
                debug!(pid = handle.pid(), status = ?handle.try_status(), "Agent exited during startup");
                monitor.wait_stopped(EXIT_DRAIN_TIMEOUT).await;
                break;
            }
            if Instant::now() >= deadline {
                debug!(pid = handle.pid(), "Agent startup timed out");
                break;
            }
            sleep(self.config.poll_interval()).await;
        }

        let logs = monitor.logs();
        match monitor.startup_error().or_else(|| monitor.read_error()) {
            Some(error) => Err(AgentError::StartupFailed { error, logs }),
            None => Err(AgentError::StartupTimeout { logs }),
        }
    }

    /// Whether a started agent process is alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|handle| handle.is_alive())
    }

    /// Stop the agent and every process it spawned. No-op when not running.
    ///
    /// Shutdown problems are logged, never returned.
    pub async fn stop(&self) {
        let _lifecycle = self.lifecycle.lock().await;
        self.stop_locked().await;
    }

    async fn stop_locked(&self) {
        let handle = self
            .handle
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            debug!(agent = %self.config.agent_path.display(), "Agent is not running a process");
            return;
        };

        info!(pid = handle.pid(), "Stopping agent process");
        if let Some(monitor) = self.monitor() {
            monitor.stop();
        }
        handle.terminate(self.config.shutdown_grace()).await;
        self.exit_hook
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    /// The agent API URL, only while the agent is running and healthy.
    pub async fn api_url(&self) -> Option<String> {
        if !self.is_running() {
            return None;
        }
        let monitor = self.monitor()?;
        if monitor.is_healthy().await {
            monitor.api_url()
        } else {
            None
        }
    }

    /// Logs from the current (or most recent) agent process.
    pub fn logs(&self) -> Vec<LogRecord> {
        self.monitor()
            .map(|monitor| monitor.logs())
            .unwrap_or_default()
    }

    /// Monitor of the current (or most recent) agent process.
    pub fn monitor(&self) -> Option<ProcessMonitor> {
        self.monitor
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Invoke `callback` for every log record, in emission order.
    ///
    /// Applies to the running agent (from the next record on) and to every
    /// later start. The callback runs on the monitor task and must not block.
    pub fn register_log_callback<F>(&self, callback: F)
    where
        F: Fn(&LogRecord) + Send + Sync + 'static,
    {
        let callback: LogCallback = Arc::new(callback);
        *self.callback.write().unwrap_or_else(PoisonError::into_inner) = Some(Arc::clone(&callback));
        if let Some(monitor) = self.monitor() {
            monitor.history().set_callback(Some(callback));
        }
    }

    fn registered_callback(&self) -> Option<LogCallback> {
        self.callback
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl std::fmt::Debug for AgentProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentProcess")
            .field("agent_path", &self.config.agent_path)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl Drop for AgentProcess {
    fn drop(&mut self) {
        if let Some(monitor) = self
            .monitor
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            monitor.stop();
        }
        if let Some(handle) = self
            .handle
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            debug!(pid = handle.pid(), "Killing agent process on drop");
            handle.kill_now();
        }
    }
}
