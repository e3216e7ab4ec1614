//! Agent command lines.
//!
//! Builds the long-running `start` invocation and runs one-shot commands
//! (such as `--version`) to completion.

use futures_util::StreamExt;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::AgentConfig;
use crate::error::{AgentError, AgentResult};
use crate::process::merged_output;

/// Arguments for `<agent> start`, in the order the agent receives them.
///
/// The agent is started with no tunnels and with its log on stdout so the
/// monitor can parse it.
pub fn start_args(config: &AgentConfig) -> Vec<String> {
    let mut args = vec![
        "start".to_string(),
        "--none".to_string(),
        "--log=stdout".to_string(),
    ];

    if let Some(config_path) = &config.config_path {
        info!(config = %config_path.display(), "Starting agent with config file");
        args.push(format!("--config={}", config_path.display()));
    }
    if let Some(token) = &config.auth_token {
        info!("Overriding default auth token");
        args.push(format!("--authtoken={token}"));
    }
    if let Some(region) = config.region {
        info!(%region, "Starting agent in region");
        args.push(format!("--region={region}"));
    }

    args
}

/// Build the `start` command for the configured agent.
///
/// On unix the agent gets its own process group so a terminal Ctrl-C reaches
/// the supervisor only; the supervisor then stops the agent itself.
pub fn build_start_command(config: &AgentConfig) -> Command {
    let mut cmd = Command::new(&config.agent_path);
    cmd.args(start_args(config));

    #[cfg(unix)]
    cmd.process_group(0);

    debug!(command = ?cmd.as_std(), "Built agent start command");
    cmd
}

/// Run the agent with `args`, wait for it to exit, and return its merged
/// stdout/stderr with surrounding whitespace trimmed.
///
/// A non-zero exit is reported as [`AgentError::CommandFailed`] carrying the
/// output.
pub async fn capture_run_process(agent_path: &Path, args: &[&str]) -> AgentResult<String> {
    let mut child = Command::new(agent_path)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(AgentError::Spawn)?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("agent stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("agent stderr was not captured"))?;

    let mut output = String::new();
    let mut lines = merged_output(stdout, stderr);
    while let Some(line) = lines.next().await {
        output.push_str(&line?);
        output.push('\n');
    }
    let output = output.trim().to_string();

    let status = child.wait().await?;
    if !status.success() {
        return Err(AgentError::CommandFailed {
            code: status.code(),
            output,
        });
    }
    Ok(output)
}

/// Agent version as reported by `<agent> --version`, e.g. `"3.5.0"` from
/// `"ngrok version 3.5.0"`.
pub async fn agent_version(agent_path: &Path) -> AgentResult<String> {
    let output = capture_run_process(agent_path, &["--version"]).await?;
    parse_version(&output).ok_or(AgentError::UnexpectedOutput { output })
}

/// Ask the agent to update itself (`<agent> update --log=stdout`) and return
/// what it printed.
pub async fn update_agent(agent_path: &Path) -> AgentResult<String> {
    info!(agent = %agent_path.display(), "Updating agent");
    capture_run_process(agent_path, &["update", "--log=stdout"]).await
}

fn parse_version(output: &str) -> Option<String> {
    let (_, rest) = output.split_once("version ")?;
    let version = rest.split_whitespace().next()?;
    Some(version.to_string())
}
