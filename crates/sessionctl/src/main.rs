//! sessionctl - open files through a session engine from the shell
//!
//! Subcommands:
//! - `sessionctl config` - Print the effective engine configuration
//! - `sessionctl cat <path>` - Read a file through a session and discard it
//! - `sessionctl write <path> --offset N <text>` - Edit a file in a session and commit

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(name = "sessionctl")]
#[command(about = "Session-buffered file access from the command line")]
#[command(version)]
struct Cli {
    /// Config file to load instead of ./sessionfs.toml
    #[arg(long, global = true, env = "SESSIONFS_CONFIG")]
    config: Option<PathBuf>,

    /// Log filter (e.g. "debug", "sessionfs=trace")
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the effective configuration as TOML
    Config,

    /// Read a whole file through a session and write it to stdout
    Cat {
        /// File to read
        path: PathBuf,
    },

    /// Write text into a file through a session, then commit
    Write {
        /// File to edit
        path: PathBuf,

        /// Byte offset to write at
        #[arg(short, long, default_value = "0")]
        offset: u64,

        /// Create the file if it does not exist
        #[arg(long)]
        create: bool,

        /// Text to write
        text: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&cli.log_level))?,
        )
        .with_writer(std::io::stderr)
        .init();

    let config = sessionfs::SessionConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Config => commands::show_config(&config),
        Commands::Cat { path } => commands::cat(config, &path)?,
        Commands::Write {
            path,
            offset,
            create,
            text,
        } => commands::write(config, &path, offset, create, &text)?,
    }

    Ok(())
}
