//! CLI for the Kairos operator harness
//!
//! Provides commands for inspecting and driving the engine:
//! - `plan`: resolve a definition file and print the desired occurrences
//! - `sync`: run one reconcile pass and print the summary
//! - `run`: host the engine with periodic recovery until Ctrl+C

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::harness;

/// Kairos reminder engine harness
#[derive(Parser, Debug)]
#[command(name = "kairos")]
#[command(about = "Reminder scheduling and recovery engine")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Resolve a definition file and print the desired occurrences
    Plan {
        /// TOML definition file
        file: PathBuf,
    },
    /// Run one reconcile pass against an in-memory port
    Sync {
        /// TOML definition file
        file: PathBuf,
        /// Bypass the debounce window
        #[arg(long)]
        force: bool,
    },
    /// Host the engine with periodic recovery until Ctrl+C
    Run {
        /// TOML definition file
        file: PathBuf,
        /// Recovery state file
        #[arg(long, default_value = "kairos-state.json")]
        state: PathBuf,
        /// Periodic resync interval in seconds
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

/// Run the CLI command
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Some(Commands::Plan { file }) => harness::plan(&file).await,
        Some(Commands::Sync { file, force }) => harness::sync(&file, force).await,
        Some(Commands::Run {
            file,
            state,
            interval,
        }) => harness::run(&file, &state, interval).await,
        None => {
            let mut cmd = <Cli as clap::CommandFactory>::command();
            cmd.print_help()?;
            println!();
            Ok(())
        }
    }
}
