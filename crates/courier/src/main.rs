mod cli;
mod commands;
mod config;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; the hook's stdout belongs to the agent
    courier_core::init_logging(cli.debug);

    // Handle init command early (doesn't need config)
    if let Commands::Init { path } = &cli.command {
        return commands::init::run_init(path);
    }

    // The hook must never fail the agent, even on a broken config
    if let Commands::Hook { socket } = cli.command {
        let config = config::load_config(cli.config.as_deref()).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Using default config");
            config::Config::default()
        });
        return commands::hook::execute(&config, socket).await;
    }

    let config = config::load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Init { .. } | Commands::Hook { .. } => Ok(()),
        Commands::Serve { target_dir } => {
            commands::serve::execute(target_dir, cli.dry_run, &config).await
        }
    }
}
