use clap::Args;
use serde::Serialize;

use sonitas_ci::defaults;
use sonitas_ci::executor::LocalExecutor;
use sonitas_ci::pipeline::{self, RunOptions, RunResult};
use sonitas_ci::workflow::WorkflowSource;

use super::{CmdResult, EventArgs, FilterArgs, GlobalArgs, WorkflowArgs};

#[derive(Args)]
pub struct RunArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    #[command(flatten)]
    pub event: EventArgs,

    #[command(flatten)]
    pub filters: FilterArgs,

    /// Maximum jobs running at once (overrides strategy.max-parallel)
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(usize))]
    pub max_parallel: Option<usize>,

    /// Keep job workspaces after the run
    #[arg(long)]
    pub keep_workspaces: bool,

    /// Directory for run workspaces (default from config)
    #[arg(long, value_name = "DIR")]
    pub work_dir: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct RunOutput {
    pub command: &'static str,
    pub source: WorkflowSource,
    #[serde(flatten)]
    pub result: RunResult,
}

pub fn run(args: RunArgs, global: &GlobalArgs) -> CmdResult<RunOutput> {
    if args.max_parallel == Some(0) {
        return Err(sonitas_ci::Error::validation_invalid_argument(
            "max_parallel",
            "--max-parallel must be at least 1",
            None,
            None,
        ));
    }

    let defaults = defaults::load_defaults();
    let (workflow, source) = super::load_workflow(global, &args.workflow)?;
    let event = super::resolve_event(&global.repo, &args.event)?;

    let work_dir = match &args.work_dir {
        Some(dir) => std::path::PathBuf::from(shellexpand::tilde(dir).to_string()),
        None => defaults.work_dir_path(),
    };

    let options = RunOptions {
        repo: global.repo.clone(),
        work_dir,
        keep_workspaces: args.keep_workspaces || defaults.keep_workspaces,
        filters: args.filters.to_filters()?,
        max_parallel: args.max_parallel,
        default_max_parallel: defaults.max_parallel,
    };

    let result = pipeline::run(&workflow, &event, &options, &LocalExecutor::new())?;
    let exit_code = if result.summary.failed == 0 { 0 } else { 1 };

    Ok((
        RunOutput {
            command: "run",
            source,
            result,
        },
        exit_code,
    ))
}
