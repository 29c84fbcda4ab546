mod case;
mod cli;
mod config;
mod harness;
mod outcome;
mod report;
mod results;
mod run;

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "eval", version, about = "Evaluation harness for fleet recovery learning")]
struct Cli {
    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    List,
    Run {
        case_id: String,
        #[arg(long, default_value_t = 1)]
        trials: u32,
        /// Clear the case's recovery history before the first trial.
        #[arg(long)]
        fresh: bool,
        #[arg(long)]
        seed: Option<u64>,
    },
    Report {
        case_id: String,
    },
    Clean {
        case_id: String,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    fleet::logging::init(cli.verbose);
    let repo_root = std::env::current_dir()?;
    match cli.command {
        Command::List => cli::list_cases(&repo_root),
        Command::Run {
            case_id,
            trials,
            fresh,
            seed,
        } => cli::run_case_by_id(
            &repo_root,
            &case_id,
            cli::RunOptions {
                trials,
                fresh,
                seed,
            },
        ),
        Command::Report { case_id } => cli::report_case(&repo_root, &case_id),
        Command::Clean { case_id } => cli::clean_case(&repo_root, &case_id),
    }
}
