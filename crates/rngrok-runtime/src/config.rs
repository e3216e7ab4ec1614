//! Agent supervision configuration.
//!
//! `AgentConfig` is an immutable value built once (through the builder or
//! from a JSON settings file) and shared by reference with every component
//! of a supervised agent.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use strum_macros::{Display, EnumString};

use crate::error::{AgentError, AgentResult};

/// Default number of log records retained per agent process.
pub const DEFAULT_MAX_LOGS: usize = 100;

/// Default time `start()` waits for the agent to become healthy.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(15);

/// Default time between SIGTERM and SIGKILL when stopping.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Agent region, passed through as `--region=<region>`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
pub enum Region {
    #[strum(serialize = "us")]
    #[serde(rename = "us")]
    Us,
    #[strum(serialize = "us-cal-1")]
    #[serde(rename = "us-cal-1")]
    UsCal1,
    #[strum(serialize = "eu")]
    #[serde(rename = "eu")]
    Eu,
    #[strum(serialize = "ap")]
    #[serde(rename = "ap")]
    Ap,
    #[strum(serialize = "au")]
    #[serde(rename = "au")]
    Au,
    #[strum(serialize = "sa")]
    #[serde(rename = "sa")]
    Sa,
    #[strum(serialize = "jp")]
    #[serde(rename = "jp")]
    Jp,
    #[strum(serialize = "in")]
    #[serde(rename = "in")]
    In,
}

/// Message substrings that mark each startup milestone in the agent log.
///
/// The wording varies between agent versions, so it is configurable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StartupPhrases {
    /// The local web/API service bound an address (line carries `addr=`)
    pub web_service: String,
    /// A tunnel session was started
    pub tunnel_session: String,
    /// The client session with the remote service was established
    pub client_session: String,
}

impl Default for StartupPhrases {
    fn default() -> Self {
        Self {
            web_service: "starting web service".to_string(),
            tunnel_session: "tunnel session started".to_string(),
            client_session: "client session established".to_string(),
        }
    }
}

/// Configuration for one supervised agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Path to the agent executable
    pub agent_path: PathBuf,
    /// Agent config file, passed as `--config=<path>`
    pub config_path: Option<PathBuf>,
    /// Auth token override, passed as `--authtoken=<token>`
    pub auth_token: Option<String>,
    /// Region override, passed as `--region=<region>`
    pub region: Option<Region>,
    /// Keep reading agent output once startup has completed
    pub keep_monitoring: bool,
    /// Log records retained per process (at least 1)
    pub max_logs: usize,
    /// Milliseconds to wait for the startup handshake (at least 1000)
    pub startup_timeout_ms: u64,
    /// Milliseconds between readiness polls during startup
    pub poll_interval_ms: u64,
    /// Milliseconds between SIGTERM and SIGKILL when stopping
    pub shutdown_grace_ms: u64,
    /// Seconds before a readiness probe request is abandoned
    pub probe_timeout_secs: u64,
    /// Log phrases that drive the startup handshake
    pub startup_phrases: StartupPhrases,
    /// `User-Agent` sent with API requests
    pub user_agent: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            agent_path: default_agent_path(),
            config_path: None,
            auth_token: None,
            region: None,
            keep_monitoring: true,
            max_logs: DEFAULT_MAX_LOGS,
            startup_timeout_ms: duration_ms(DEFAULT_STARTUP_TIMEOUT),
            poll_interval_ms: 50,
            shutdown_grace_ms: duration_ms(DEFAULT_SHUTDOWN_GRACE),
            probe_timeout_secs: 2,
            startup_phrases: StartupPhrases::default(),
            user_agent: default_user_agent(),
        }
    }
}

/// `~/.ngrok2/ngrok[.exe]`, falling back to a bare name resolved relative to
/// the working directory when no home directory is known.
pub fn default_agent_path() -> PathBuf {
    let bin = if cfg!(windows) { "ngrok.exe" } else { "ngrok" };
    dirs::home_dir()
        .map(|home| home.join(".ngrok2").join(bin))
        .unwrap_or_else(|| PathBuf::from(bin))
}

/// Whole milliseconds in `duration`, saturating.
fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn default_user_agent() -> String {
    format!("rngrok/{}", env!("CARGO_PKG_VERSION"))
}

impl AgentConfig {
    /// Start building a config from the defaults.
    pub fn builder() -> AgentConfigBuilder {
        AgentConfigBuilder::default()
    }

    /// Load and validate a JSON settings file. Missing fields take their
    /// defaults.
    pub fn load(path: &Path) -> AgentResult<Self> {
        let json = fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&json).map_err(|e| {
            AgentError::InvalidConfig(format!("failed to parse {}: {e}", path.display()))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges.
    pub fn validate(&self) -> AgentResult<()> {
        if self.max_logs < 1 {
            return Err(AgentError::InvalidConfig(
                "max_logs must be greater than 0".to_string(),
            ));
        }
        if self.startup_timeout_ms < 1000 {
            return Err(AgentError::InvalidConfig(
                "startup_timeout_ms must be at least 1000".to_string(),
            ));
        }
        Ok(())
    }

    pub const fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub const fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }

    pub const fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }
}

/// Builder for [`AgentConfig`]; `build()` validates.
#[derive(Debug, Clone, Default)]
pub struct AgentConfigBuilder {
    config: AgentConfig,
}

impl AgentConfigBuilder {
    pub fn agent_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.agent_path = path.into();
        self
    }

    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.config_path = Some(path.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.config.auth_token = Some(token.into());
        self
    }

    pub fn region(mut self, region: Region) -> Self {
        self.config.region = Some(region);
        self
    }

    /// Stop reading agent output once startup has completed.
    pub fn without_monitoring(mut self) -> Self {
        self.config.keep_monitoring = false;
        self
    }

    pub fn max_logs(mut self, max_logs: usize) -> Self {
        self.config.max_logs = max_logs;
        self
    }

    pub fn startup_timeout(mut self, timeout: Duration) -> Self {
        self.config.startup_timeout_ms = duration_ms(timeout);
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval_ms = duration_ms(interval);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.config.shutdown_grace_ms = duration_ms(grace);
        self
    }

    pub fn startup_phrases(mut self, phrases: StartupPhrases) -> Self {
        self.config.startup_phrases = phrases;
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    pub fn build(self) -> AgentResult<AgentConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
