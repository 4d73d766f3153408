//! Command-line interface for chess_academy.

use clap::{Parser, Subcommand};

/// Chess Academy - chess learning platform backend
#[derive(Parser, Debug)]
#[command(name = "chess_academy")]
#[command(about = "Chess learning platform backend", long_about = None)]
#[command(version)]
pub struct Cli {
    /// Subcommand to run
    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run the HTTP API server
    Serve {
        /// Path to the TOML configuration file
        #[arg(short, long)]
        config: Option<std::path::PathBuf>,

        /// Override the configured database path
        #[arg(long)]
        db_path: Option<String>,

        /// Override the configured bind host
        #[arg(long)]
        host: Option<String>,

        /// Override the configured bind port
        #[arg(long)]
        port: Option<u16>,
    },
}
