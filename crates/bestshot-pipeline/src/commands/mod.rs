//! Command implementations for the CLI.
//!
//! Each submodule implements one subcommand on top of [`crate::Pipeline`].

pub mod analyze;
pub mod batch;
pub mod process;

use anyhow::{Context, Result};
use std::path::Path;

use crate::cli::{Cli, Commands};
use crate::config::PipelineConfig;

/// Run the parsed command line.
pub async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Process(args) => process::execute(args, config_path).await,
        Commands::Batch(args) => batch::execute(args, config_path).await,
        Commands::Analyze(args) => analyze::execute(args, config_path).await,
    }
}

pub(crate) fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    PipelineConfig::load(path).context("Failed to load configuration")
}
