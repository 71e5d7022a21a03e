use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::GlobalArgs;

mod commands;
mod output;
mod tty;

use commands::{config, init, plan, run, tasks, validate};

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser)]
#[command(name = "sonitas-ci")]
#[command(version = VERSION)]
#[command(about = "Run the push CI pipeline locally: matrix jobs, fail-fast steps, lint and test tasks")]
struct Cli {
    /// Repository to run against
    #[arg(long, short = 'C', global = true, default_value = ".", value_name = "DIR")]
    repo: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the workflow for a push
    Run(run::RunArgs),
    /// Show the jobs and rendered steps a push would run
    Plan(plan::PlanArgs),
    /// Check a workflow file without running it
    Validate(validate::ValidateArgs),
    /// Write the built-in workflow into the repository
    Init(init::InitArgs),
    /// List or run workflow tasks
    Tasks(tasks::TasksArgs),
    /// Manage runner configuration
    Config(config::ConfigArgs),
}

fn main() -> std::process::ExitCode {
    let cli = Cli::parse();

    let global = GlobalArgs { repo: cli.repo };

    let (json_result, exit_code) = commands::run_json(cli.command, &global);
    if output::print_json_result(json_result).is_err() {
        return std::process::ExitCode::from(1);
    }

    std::process::ExitCode::from(exit_code_to_u8(exit_code))
}

fn exit_code_to_u8(code: i32) -> u8 {
    if code <= 0 {
        0
    } else if code >= 255 {
        255
    } else {
        code as u8
    }
}
