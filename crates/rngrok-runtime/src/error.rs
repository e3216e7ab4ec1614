//! Error types for agent process management.

use std::path::PathBuf;
use thiserror::Error;

use crate::log::LogRecord;

/// Errors that can occur while running or talking to the agent.
#[derive(Debug, Error)]
pub enum AgentError {
    // === Start preconditions ===
    /// The agent executable does not exist
    #[error("agent binary was not found at {}", path.display())]
    BinaryNotFound { path: PathBuf },

    /// The agent config file passed via `--config` does not exist
    #[error("agent config file was not found at {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// A configuration value is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Spawning the child process failed
    #[error("failed to spawn the agent process: {0}")]
    Spawn(#[source] std::io::Error),

    // === Startup handshake ===
    /// The agent reported an error (or its output could not be read) before
    /// it became healthy
    #[error("The agent process errored on start: {error}.")]
    StartupFailed { error: String, logs: Vec<LogRecord> },

    /// The agent never became healthy within the startup timeout
    #[error("The agent process was unable to start.")]
    StartupTimeout { logs: Vec<LogRecord> },

    /// The discovered API address does not use an accepted scheme. Never retried.
    #[error("agent API URL must use http or https: {url}")]
    Security { url: String },

    // === One-shot commands ===
    /// A one-shot agent command exited unsuccessfully
    #[error("the agent exited with code {code:?}: {output}")]
    CommandFailed { code: Option<i32>, output: String },

    /// A one-shot agent command succeeded but its output was not understood
    #[error("unexpected agent output: {output}")]
    UnexpectedOutput { output: String },

    /// IO operation failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AgentError {
    /// Log records captured up to the point of a startup failure.
    pub fn logs(&self) -> &[LogRecord] {
        match self {
            Self::StartupFailed { logs, .. } | Self::StartupTimeout { logs } => logs.as_slice(),
            _ => &[],
        }
    }

    /// The error text reported by the agent itself, if any.
    pub fn agent_error(&self) -> Option<&str> {
        match self {
            Self::StartupFailed { error, .. } => Some(error.as_str()),
            _ => None,
        }
    }

    /// Whether this is the fatal security condition on the API address.
    pub const fn is_security(&self) -> bool {
        matches!(self, Self::Security { .. })
    }
}

/// Result type alias for agent operations
pub type AgentResult<T> = Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_startup_failed_carries_logs() {
        let logs = vec![LogRecord::parse("lvl=CRIT err=\"bind: address already in use\"")];
        let err = AgentError::StartupFailed {
            error: "bind: address already in use".to_string(),
            logs,
        };
        assert_eq!(
            err.to_string(),
            "The agent process errored on start: bind: address already in use."
        );
        assert_eq!(err.logs().len(), 1);
        assert_eq!(err.agent_error(), Some("bind: address already in use"));
        assert!(!err.is_security());
    }

    #[test]
    fn test_other_errors_have_no_logs() {
        let err = AgentError::BinaryNotFound {
            path: PathBuf::from("/nope/ngrok"),
        };
        assert!(err.logs().is_empty());
        assert!(err.to_string().contains("/nope/ngrok"));
        assert!(AgentError::Security { url: "ftp://x".into() }.is_security());
    }
}
