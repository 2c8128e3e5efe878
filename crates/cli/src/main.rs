//! UIBench CLI - Main Entry Point
//!
//! Runs benchmark tasks for registered agents, re-scores finished runs, and
//! lists available agents.

use clap::{Parser, Subcommand};
use std::process::ExitCode;

mod artifacts;
mod commands;
mod logging;
mod output;

use commands::{agents, eval, run};

/// UIBench - benchmark harness for UI testing agents
#[derive(Parser)]
#[command(name = "uibench")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every (case, agent) pair and score the results
    Run(run::RunArgs),

    /// Re-score an existing run directory
    Eval(eval::EvalArgs),

    /// List registered agents
    Agents,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    let events = logging::init(cli.verbose);

    let result = match cli.command {
        Commands::Run(args) => run::execute(args, cli.format, &events).await,
        Commands::Eval(args) => eval::execute(args, cli.format),
        Commands::Agents => agents::execute(cli.format),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            if let Some(err) = e.downcast_ref::<uibench_common::Error>() {
                eprintln!("   category: {}", err.category());
            }
            ExitCode::FAILURE
        }
    }
}
