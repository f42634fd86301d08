//! CLI command definitions.

use crate::config::parse_parallel;
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run the pipeline in local containers
    Run(RunArgs),

    /// Parse the CI file and list its stages and jobs
    Validate {
        /// Directory to search for the CI file
        #[arg(short, long)]
        path: Option<PathBuf>,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Directory to search for the CI file
    #[arg(short, long)]
    pub path: Option<PathBuf>,

    /// Run only this job
    #[arg(short, long)]
    pub job: Option<String>,

    /// Print bare output lines without the [stage/job] tag
    #[arg(long)]
    pub plain: bool,

    /// Disable coloured output
    #[arg(long)]
    pub no_color: bool,

    /// Mount the project directory into every job container
    #[arg(long)]
    pub mount: bool,

    /// Jobs of one stage to run at the same time
    #[arg(long, value_parser = parse_parallel)]
    pub parallel: Option<usize>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show current configuration
    Show,
}
