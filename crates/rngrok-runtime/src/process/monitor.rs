//! Background reader for agent output.
//!
//! One tokio task per agent process consumes the merged stdout/stderr line
//! stream. During startup every record feeds the history and the
//! [`StartupGate`]; afterwards (when configured to keep monitoring) records
//! only feed the history and its callback. Without monitoring the output is
//! still drained, unparsed, so the agent never blocks on a full pipe.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, Weak};
use std::time::Duration;

use futures_util::StreamExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::gate::{StartupGate, StartupState};
use super::handle::ProcessLiveness;
use super::stream::LineStream;
use crate::config::AgentConfig;
use crate::error::AgentResult;
use crate::health::ApiStatusProbe;
use crate::log::{BoundedLogHistory, LogLevel, LogRecord};

/// Outcome of a readiness check that did not hit a fatal condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Handshake complete, API answering, process alive
    Ready,
    /// Not there yet; poll again
    Pending,
}

/// How the startup phase ended.
enum StartupPhase {
    /// Every milestone was observed
    Complete,
    /// Fatal line, read error, end of stream, or stop requested
    Ended,
}

struct MonitorShared {
    gate: RwLock<StartupGate>,
    history: Arc<BoundedLogHistory>,
    liveness: Weak<dyn ProcessLiveness>,
    probe: Arc<dyn ApiStatusProbe>,
    keep_monitoring: bool,
    cancel: CancellationToken,
    finished: CancellationToken,
    monitoring: AtomicBool,
    read_error: Mutex<Option<String>>,
}

/// Handle to the monitor task of one agent process. Cheap to clone.
#[derive(Clone)]
pub struct ProcessMonitor {
    shared: Arc<MonitorShared>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ProcessMonitor {
    /// Start monitoring `lines` on a new tokio task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(
        lines: LineStream,
        liveness: Weak<dyn ProcessLiveness>,
        history: Arc<BoundedLogHistory>,
        probe: Arc<dyn ApiStatusProbe>,
        config: &AgentConfig,
    ) -> Self {
        let shared = Arc::new(MonitorShared {
            gate: RwLock::new(StartupGate::new(config.startup_phrases.clone())),
            history,
            liveness,
            probe,
            keep_monitoring: config.keep_monitoring,
            cancel: CancellationToken::new(),
            finished: CancellationToken::new(),
            monitoring: AtomicBool::new(true),
            read_error: Mutex::new(None),
        });

        let task = tokio::spawn(Arc::clone(&shared).run(lines));

        Self {
            shared,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }

    /// Check whether the agent finished its startup handshake.
    ///
    /// `Err` is reserved for the fatal security condition on the API address;
    /// everything else that is not yet ready is `Ok(Readiness::Pending)`.
    pub async fn check_readiness(&self) -> AgentResult<Readiness> {
        if self.read_error().is_some() {
            return Ok(Readiness::Pending);
        }

        let api_url = {
            let gate = self.shared.gate.read().unwrap_or_else(PoisonError::into_inner);
            match gate.ready_url()? {
                Some(url) => url.to_string(),
                None => return Ok(Readiness::Pending),
            }
        };

        if !self.shared.probe.is_ready(&api_url).await {
            return Ok(Readiness::Pending);
        }

        if self.shared.process_alive() {
            Ok(Readiness::Ready)
        } else {
            Ok(Readiness::Pending)
        }
    }

    /// `check_readiness` collapsed to a bool; the security condition counts
    /// as unhealthy.
    pub async fn is_healthy(&self) -> bool {
        match self.check_readiness().await {
            Ok(Readiness::Ready) => true,
            Ok(Readiness::Pending) => false,
            Err(e) => {
                warn!(error = %e, "Agent failed readiness check");
                false
            }
        }
    }

    /// Handshake state as derived from the log alone.
    pub fn startup_state(&self) -> StartupState {
        self.shared.gate().state(self.shared.process_alive())
    }

    /// API URL captured from the log, whether or not the agent is healthy.
    pub fn api_url(&self) -> Option<String> {
        self.shared.gate().api_url().map(str::to_string)
    }

    pub fn startup_error(&self) -> Option<String> {
        self.shared.gate().startup_error().map(str::to_string)
    }

    /// Error that ended the read loop, if reading the output failed.
    pub fn read_error(&self) -> Option<String> {
        self.shared
            .read_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Whether the read loop is still consuming agent output.
    pub fn is_monitoring(&self) -> bool {
        self.shared.monitoring.load(Ordering::SeqCst)
    }

    /// Snapshot of the retained log records.
    pub fn logs(&self) -> Vec<LogRecord> {
        self.shared.history.snapshot()
    }

    pub fn history(&self) -> &Arc<BoundedLogHistory> {
        &self.shared.history
    }

    /// Wait up to `timeout` for the read loop to end. Returns true if it did.
    pub async fn wait_stopped(&self, timeout: Duration) -> bool {
        tokio::time::timeout(timeout, self.shared.finished.cancelled())
            .await
            .is_ok()
    }

    /// Ask the read loop (or the drain that replaces it when not monitoring)
    /// to stop.
    ///
    /// A read that is already in flight is abandoned at its next wake-up;
    /// terminating the process closes the pipe and guarantees one.
    pub fn stop(&self) {
        self.shared.cancel.cancel();
        self.shared.monitoring.store(false, Ordering::SeqCst);
    }

    /// Whether the monitor task has completed (including by panicking in a
    /// log callback).
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_none_or(JoinHandle::is_finished)
    }
}

impl std::fmt::Debug for ProcessMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessMonitor")
            .field("monitoring", &self.is_monitoring())
            .field("api_url", &self.api_url())
            .field("startup_error", &self.startup_error())
            .finish_non_exhaustive()
    }
}

impl MonitorShared {
    async fn run(self: Arc<Self>, mut lines: LineStream) {
        let drain = match self.read_startup(&mut lines).await {
            StartupPhase::Complete if self.keep_monitoring => {
                self.read_steady(&mut lines).await;
                false
            }
            StartupPhase::Complete => {
                debug!("Startup complete, no longer monitoring agent output");
                true
            }
            StartupPhase::Ended => false,
        };

        self.monitoring.store(false, Ordering::SeqCst);
        self.finished.cancel();

        if drain {
            self.discard_remaining(&mut lines).await;
        }
        debug!("Agent monitor task exiting");
    }

    async fn read_startup(&self, lines: &mut LineStream) -> StartupPhase {
        loop {
            if self.cancel.is_cancelled() {
                return StartupPhase::Ended;
            }

            let line = match self.next_line(lines).await {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    self.record_read_error(&e);
                    return StartupPhase::Ended;
                }
                None => return StartupPhase::Ended,
            };

            let Some(record) = self.log_line(&line) else {
                continue;
            };

            let mut gate = self.gate.write().unwrap_or_else(PoisonError::into_inner);
            gate.observe(&record);
            if let Some(err) = gate.startup_error() {
                error!(error = %err, "Agent reported a fatal error during startup");
                return StartupPhase::Ended;
            }
            if gate.signals_complete() {
                info!(api_url = gate.api_url().unwrap_or_default(), "Agent startup milestones observed");
                return StartupPhase::Complete;
            }
        }
    }

    async fn read_steady(&self, lines: &mut LineStream) {
        loop {
            if self.cancel.is_cancelled() || !self.process_alive() {
                return;
            }

            match self.next_line(lines).await {
                Some(Ok(line)) => {
                    self.log_line(&line);
                }
                Some(Err(e)) => {
                    self.record_read_error(&e);
                    return;
                }
                None => return,
            }
        }
    }

    /// Next output line, or `None` at end of stream or when stop is requested.
    async fn next_line(&self, lines: &mut LineStream) -> Option<io::Result<String>> {
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            line = lines.next() => line,
        }
    }

    /// Parse, trace, and store one line. Blank lines yield `None`.
    fn log_line(&self, line: &str) -> Option<LogRecord> {
        let record = LogRecord::parse(line);
        if record.is_blank() {
            return None;
        }

        let text = record.msg().unwrap_or_else(|| record.line());
        match record.level() {
            LogLevel::Severe => error!(target: "rngrok::agent", err = record.err(), "{text}"),
            LogLevel::Warning => warn!(target: "rngrok::agent", "{text}"),
            LogLevel::Info => debug!(target: "rngrok::agent", "{text}"),
        }

        self.history.append(record.clone());
        Some(record)
    }

    fn record_read_error(&self, e: &io::Error) {
        error!(error = %e, "Failed to read agent output");
        *self
            .read_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(e.to_string());
    }

    /// Read and drop output until end of stream or stop.
    async fn discard_remaining(&self, lines: &mut LineStream) {
        let mut discarded: u64 = 0;
        while let Some(Ok(_)) = self.next_line(lines).await {
            discarded += 1;
        }
        debug!(discarded, "Stopped draining agent output");
    }

    fn gate(&self) -> std::sync::RwLockReadGuard<'_, StartupGate> {
        self.gate.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn process_alive(&self) -> bool {
        self.liveness.upgrade().is_some_and(|p| p.is_alive())
    }
}
