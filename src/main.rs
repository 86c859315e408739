use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use convoy::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "convoy")]
#[command(version, about = "Mode-driven orchestrator for batched AI coding-agent runs")]
pub struct Cli {
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Skip interactive confirmations
    #[arg(long, global = true)]
    pub yes: bool,

    /// Project to assess and orchestrate (defaults to the current directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Assess the project and recommend a workflow mode
    Assess {
        /// Emit the recommendation as JSON instead of text
        #[arg(long)]
        json: bool,
    },
    /// List the workflow modes and their policies
    Modes,
    /// Verify the external tool is installed and authenticated
    Check,
    /// Run a workflow mode's task set through staged waves
    Run {
        /// Mode to run (e.g. foundation, build); assessed when omitted
        #[arg(short, long)]
        mode: Option<String>,

        /// Run the fixed wave configuration over this file's items
        /// (one work item per line) instead of the mode's stage plan
        #[arg(long)]
        work_list: Option<PathBuf>,
    },
    /// Show the recorded mode transition history
    History,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "convoy=debug" } else { "convoy=warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    let project_dir = match cli.project_dir {
        Some(dir) => dir,
        None => std::env::current_dir()?,
    };
    let config = Config::new(project_dir, cli.verbose)?;

    match cli.command {
        Commands::Assess { json } => cmd::assess::execute(&config, json),
        Commands::Modes => cmd::modes::execute(),
        Commands::Check => cmd::check::execute(&config).await,
        Commands::Run { mode, work_list } => {
            cmd::run::execute(&config, mode, work_list, cli.yes).await
        }
        Commands::History => cmd::history::execute(&config),
    }
}
