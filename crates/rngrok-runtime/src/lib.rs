//! Supervision of an ngrok agent process.
//!
//! [`AgentProcess`] launches the agent, parses its `logfmt`-style output into
//! [`LogRecord`]s, waits for the startup handshake, and tears the whole
//! process tree down again on `stop()` or drop.

#![deny(unsafe_code)]

pub mod command;
pub mod config;
pub mod error;
pub mod health;
pub mod log;
pub mod process;

pub use command::{agent_version, capture_run_process, update_agent};
pub use config::{AgentConfig, AgentConfigBuilder, Region, StartupPhrases};
pub use error::{AgentError, AgentResult};
pub use health::{ApiStatusProbe, HttpStatusProbe};
pub use log::{BoundedLogHistory, LogCallback, LogLevel, LogRecord};
pub use process::{AgentProcess, ProcessMonitor, Readiness, StartupGate, StartupState};
