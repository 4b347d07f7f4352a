use anyhow::Result;
use clap::{Parser, Subcommand};
use listwatch_core::config::DEFAULT_CONFIG_FILE;
use std::path::PathBuf;
use tracing::Level;

mod commands;

use commands::{diff, init, run, status};

#[derive(Parser)]
#[command(name = "listwatch")]
#[command(version, about = "Report records newly added to remote list files", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Show debug logs
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only show warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compare the monitored files against the last processed reference
    Run {
        /// Write output files but do not commit them
        #[arg(long)]
        no_commit: bool,
    },

    /// Show configuration and the last processed reference
    Status,

    /// Show records added to one file between two references
    Diff {
        /// Path of the file inside the monitored repository
        file: String,

        /// Older reference
        #[arg(long)]
        from: String,

        /// Newer reference (defaults to the current tip)
        #[arg(long)]
        to: Option<String>,
    },

    /// Write a starter configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else if cli.quiet {
        Level::WARN
    } else {
        Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run { no_commit } => {
            run::run(&cli.config, no_commit).await?;
        }
        Commands::Status => {
            status::run(&cli.config)?;
        }
        Commands::Diff { file, from, to } => {
            diff::run(&cli.config, file, from, to).await?;
        }
        Commands::Init { force } => {
            init::run(&cli.config, force)?;
        }
    }

    Ok(())
}
