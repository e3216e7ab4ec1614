//! Startup handshake state machine.
//!
//! The agent is considered started once three milestones have appeared in
//! its log (API address bound, tunnel session started, client session
//! established) and no fatal line was seen first. Flags only ever go from
//! unset to set within one process lifetime.

use url::Url;

use crate::config::StartupPhrases;
use crate::error::{AgentError, AgentResult};
use crate::log::{LogLevel, LogRecord};

/// Generic startup error when a fatal line carries no `err` token.
const UNKNOWN_STARTUP_ERROR: &str = "the agent logged a fatal error";

/// Schemes the discovered API address may use.
const ACCEPTED_SCHEMES: &[&str] = &["http", "https"];

/// Coarse handshake state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupState {
    /// Milestones still outstanding
    Waiting,
    /// All milestones observed, no error
    Healthy,
    /// A fatal line was observed and the process has exited
    Failed,
}

/// Tracks startup milestones for one agent process.
#[derive(Debug, Clone)]
pub struct StartupGate {
    phrases: StartupPhrases,
    api_url: Option<String>,
    tunnel_session_started: bool,
    client_connected: bool,
    startup_error: Option<String>,
}

impl StartupGate {
    pub const fn new(phrases: StartupPhrases) -> Self {
        Self {
            phrases,
            api_url: None,
            tunnel_session_started: false,
            client_connected: false,
            startup_error: None,
        }
    }

    /// Update the milestones from one log record.
    ///
    /// Ignored once a startup error has been recorded or every milestone has
    /// been seen.
    pub fn observe(&mut self, record: &LogRecord) {
        if self.startup_error.is_some() || self.signals_complete() {
            return;
        }

        if record.level() == LogLevel::Severe {
            self.startup_error = Some(
                record
                    .err()
                    .filter(|e| !e.trim().is_empty())
                    .unwrap_or(UNKNOWN_STARTUP_ERROR)
                    .to_string(),
            );
            return;
        }

        let Some(msg) = record.msg() else {
            return;
        };

        if msg.contains(&self.phrases.web_service) {
            if let Some(addr) = record.addr() {
                self.api_url = Some(format!("http://{addr}"));
            }
        } else if msg.contains(&self.phrases.tunnel_session) {
            self.tunnel_session_started = true;
        } else if msg.contains(&self.phrases.client_session) {
            self.client_connected = true;
        }
    }

    pub const fn api_address_known(&self) -> bool {
        self.api_url.is_some()
    }

    pub const fn tunnel_session_started(&self) -> bool {
        self.tunnel_session_started
    }

    pub const fn client_connected(&self) -> bool {
        self.client_connected
    }

    /// All three milestones have been observed.
    pub const fn signals_complete(&self) -> bool {
        self.api_url.is_some() && self.tunnel_session_started && self.client_connected
    }

    pub fn startup_error(&self) -> Option<&str> {
        self.startup_error.as_deref()
    }

    /// The captured API URL, as soon as it is known.
    pub fn api_url(&self) -> Option<&str> {
        self.api_url.as_deref()
    }

    /// The API URL once the handshake is complete.
    ///
    /// Returns `Ok(None)` while waiting or after a startup error, and
    /// `Err(AgentError::Security)` when the address does not use an accepted
    /// scheme.
    pub fn ready_url(&self) -> AgentResult<Option<&str>> {
        if self.startup_error.is_some() || !self.signals_complete() {
            return Ok(None);
        }
        let Some(api_url) = self.api_url.as_deref() else {
            return Ok(None);
        };

        let accepted = Url::parse(api_url)
            .map(|url| ACCEPTED_SCHEMES.contains(&url.scheme()) && url.host().is_some())
            .unwrap_or(false);
        if !accepted {
            return Err(AgentError::Security {
                url: api_url.to_string(),
            });
        }

        Ok(Some(api_url))
    }

    pub fn state(&self, process_alive: bool) -> StartupState {
        if self.startup_error.is_some() {
            if process_alive {
                StartupState::Waiting
            } else {
                StartupState::Failed
            }
        } else if self.signals_complete() {
            StartupState::Healthy
        } else {
            StartupState::Waiting
        }
    }
}

impl Default for StartupGate {
    fn default() -> Self {
        Self::new(StartupPhrases::default())
    }
}
