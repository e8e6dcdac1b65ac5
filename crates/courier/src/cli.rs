use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "courier")]
#[command(about = "Courier - relay a terminal coding agent to chat", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to config file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Raise the default log level to debug (RUST_LOG still wins)
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log notifications instead of sending them to the chat
    #[arg(long, global = true)]
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new config file
    Init {
        /// Path for new config file
        #[arg(default_value = "courier.toml")]
        path: PathBuf,
    },
    /// Run the relay engine and hook ingest server
    Serve {
        /// Directory whose agent sessions are relayed (default: config, then cwd)
        #[arg(long)]
        target_dir: Option<PathBuf>,
    },
    /// Forward one hook record from stdin to the running relay
    Hook {
        /// Socket to deliver to (default: derived from the record's cwd)
        #[arg(long)]
        socket: Option<PathBuf>,
    },
}
