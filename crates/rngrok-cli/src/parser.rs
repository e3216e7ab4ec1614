//! Command-line definition.

use clap::{Parser, Subcommand};
use rngrok_runtime::Region;
use std::path::PathBuf;

/// Supervise an ngrok agent from the command line.
#[derive(Parser)]
#[command(name = "rngrok")]
#[command(about = "Run and supervise the ngrok agent")]
#[command(version)]
pub struct Cli {
    /// Path to the agent executable (defaults to ~/.ngrok2/ngrok)
    #[arg(long = "agent-path", global = true, env = "RNGROK_AGENT_PATH")]
    pub agent_path: Option<PathBuf>,

    /// JSON settings file providing supervision defaults
    #[arg(long = "settings", global = true)]
    pub settings: Option<PathBuf>,

    /// Enable verbose/debug output
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the agent and supervise it until Ctrl-C
    Start(StartArgs),
    /// Print the agent version
    Version,
    /// Update the agent binary in place
    Update,
    /// Parse one agent log line and print it as JSON
    ParseLog {
        /// The raw log line
        line: String,
    },
}

#[derive(clap::Args, Default)]
pub struct StartArgs {
    /// Agent config file, passed as --config
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Auth token override
    #[arg(long, env = "NGROK_AUTHTOKEN", hide_env_values = true)]
    pub authtoken: Option<String>,

    /// Region override (us, us-cal-1, eu, ap, au, sa, jp, in)
    #[arg(long)]
    pub region: Option<Region>,

    /// Seconds to wait for the agent to become healthy
    #[arg(long = "startup-timeout")]
    pub startup_timeout: Option<u64>,

    /// Log records to retain
    #[arg(long = "max-logs")]
    pub max_logs: Option<usize>,

    /// Stop reading agent output once it has started
    #[arg(long = "no-monitor")]
    pub no_monitor: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_parser_builds() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_start_args() {
        let cli = Cli::parse_from([
            "rngrok",
            "--agent-path",
            "/opt/ngrok",
            "start",
            "--region",
            "eu",
            "--startup-timeout",
            "30",
            "--no-monitor",
        ]);
        assert_eq!(cli.agent_path, Some(PathBuf::from("/opt/ngrok")));
        let Commands::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert_eq!(args.region, Some(Region::Eu));
        assert_eq!(args.startup_timeout, Some(30));
        assert!(args.no_monitor);
    }

    #[test]
    fn test_unknown_region_is_rejected() {
        assert!(Cli::try_parse_from(["rngrok", "start", "--region", "mars"]).is_err());
    }

    #[test]
    fn test_parse_log_takes_line() {
        let cli = Cli::parse_from(["rngrok", "parse-log", "lvl=info msg=hi"]);
        assert!(matches!(cli.command, Commands::ParseLog { ref line } if line == "lvl=info msg=hi"));
    }
}
