//! Subcommand handlers.

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, bail};
use rngrok_runtime::{AgentConfig, AgentProcess, LogLevel, LogRecord, agent_version, update_agent};
use tracing::{info, warn};

use crate::parser::{Cli, StartArgs};

/// Resolve the agent configuration: settings file (or defaults), then
/// command-line overrides.
pub fn resolve_config(cli: &Cli, args: &StartArgs) -> anyhow::Result<AgentConfig> {
    let mut config = match &cli.settings {
        Some(path) => AgentConfig::load(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => AgentConfig::default(),
    };

    if let Some(agent_path) = &cli.agent_path {
        config.agent_path.clone_from(agent_path);
    }
    if let Some(config_path) = &args.config {
        config.config_path = Some(config_path.clone());
    }
    if let Some(token) = &args.authtoken {
        config.auth_token = Some(token.clone());
    }
    if args.region.is_some() {
        config.region = args.region;
    }
    if let Some(secs) = args.startup_timeout {
        config.startup_timeout_ms = secs.saturating_mul(1000);
    }
    if let Some(max_logs) = args.max_logs {
        config.max_logs = max_logs;
    }
    if args.no_monitor {
        config.keep_monitoring = false;
    }

    config.validate()?;
    Ok(config)
}

/// How often a supervised agent is checked for an unexpected exit.
const WATCH_INTERVAL: Duration = Duration::from_millis(250);

/// Start the agent, echo its log, and stop it on Ctrl-C.
///
/// Fails if the agent exits on its own.
pub async fn handle_start(config: AgentConfig) -> anyhow::Result<()> {
    let agent = AgentProcess::new(config)?;
    agent.register_log_callback(print_record);

    if let Err(e) = agent.start().await {
        for record in e.logs() {
            eprintln!("  {}", record.line());
        }
        return Err(e).context("Agent did not start");
    }

    match agent.api_url().await {
        Some(url) => println!("Agent API available at {url}"),
        None => println!("Agent started"),
    }
    println!("Press Ctrl-C to stop");

    supervise_until(&agent, async {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl-C")
    })
    .await
}

/// Watch a started agent until `shutdown` resolves, then stop it.
///
/// Returns an error as soon as the agent is found dead, or when `shutdown`
/// itself fails.
pub async fn supervise_until<F>(agent: &AgentProcess, shutdown: F) -> anyhow::Result<()>
where
    F: Future<Output = anyhow::Result<()>>,
{
    tokio::pin!(shutdown);
    let mut watch = tokio::time::interval(WATCH_INTERVAL);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                info!("Shutdown requested, stopping agent");
                agent.stop().await;
                return result;
            }
            _ = watch.tick() => {
                if !agent.is_running() {
                    warn!("Agent exited unexpectedly");
                    for record in agent.logs() {
                        eprintln!("  {}", record.line());
                    }
                    agent.stop().await;
                    bail!("Agent exited unexpectedly");
                }
            }
        }
    }
}

fn print_record(record: &LogRecord) {
    match record.level() {
        LogLevel::Info => println!("{}", record.line()),
        LogLevel::Warning | LogLevel::Severe => eprintln!("{}", record.line()),
    }
}

pub async fn handle_version(config: &AgentConfig) -> anyhow::Result<()> {
    let version = agent_version(&config.agent_path).await?;
    println!("rngrok {}", env!("CARGO_PKG_VERSION"));
    println!("agent {version}");
    Ok(())
}

pub async fn handle_update(config: &AgentConfig) -> anyhow::Result<()> {
    let output = update_agent(&config.agent_path)
        .await
        .context("Agent update failed")?;
    println!("{output}");
    Ok(())
}

pub fn handle_parse_log(line: &str) -> anyhow::Result<()> {
    let record = LogRecord::parse(line);
    println!("{}", serde_json::to_string_pretty(&record)?);
    Ok(())
}
