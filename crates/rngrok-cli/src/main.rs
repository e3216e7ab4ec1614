//! CLI entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use rngrok_cli::{Cli, Commands, StartArgs, handlers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match &cli.command {
        Commands::Start(args) => {
            let config = handlers::resolve_config(&cli, args)?;
            handlers::handle_start(config).await
        }
        Commands::Version => {
            let config = handlers::resolve_config(&cli, &StartArgs::default())?;
            handlers::handle_version(&config).await
        }
        Commands::Update => {
            let config = handlers::resolve_config(&cli, &StartArgs::default())?;
            handlers::handle_update(&config).await
        }
        Commands::ParseLog { line } => handlers::handle_parse_log(line),
    }
}
