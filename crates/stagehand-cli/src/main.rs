//! stagehand CLI entrypoint.

use clap::Parser;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod detector;
mod handlers;
mod parser;

#[cfg(test)]
mod parser_tests;

use commands::{Commands, ConfigCommands};
use config::CliConfig;
use stagehand_runner::Cancellation;

#[derive(Parser)]
#[command(name = "stagehand")]
#[command(author, version, about = "Run GitLab CI pipelines locally in containers", long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = match CliConfig::load() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} Invalid configuration: {}", console::style("✗").red(), e);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command {
        Commands::Run(args) => {
            let (tx, cancel) = Cancellation::channel();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("Interrupt received, cancelling run");
                    let _ = tx.send(true);
                }
            });
            handlers::run(&config, args, cancel).await
        }
        Commands::Validate { path } => handlers::validate(&config, path),
        Commands::Config { command } => match command {
            ConfigCommands::Show => handlers::show_config(&config),
        },
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            handlers::print_failure(&e);
            ExitCode::from(handlers::exit_code(&e))
        }
    }
}
