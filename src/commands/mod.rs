use std::path::{Path, PathBuf};

use clap::Args;

use sonitas_ci::defaults;
use sonitas_ci::matrix;
use sonitas_ci::workflow::{self, Workflow, WorkflowSource};
use sonitas_ci::{RunFilters, TriggerEvent};

pub type CmdResult<T> = sonitas_ci::Result<(T, i32)>;

pub(crate) struct GlobalArgs {
    /// Repository the pipeline runs against.
    pub repo: PathBuf,
}

/// Workflow selection shared by every command that reads one.
#[derive(Args, Debug, Default)]
pub struct WorkflowArgs {
    /// Workflow file (default: <repo>/.sonitas-ci.yml, else the built-in workflow)
    #[arg(long, short = 'w', value_name = "PATH")]
    pub workflow: Option<PathBuf>,
}

/// Push event description. Missing values are read from the repository.
#[derive(Args, Debug, Default)]
pub struct EventArgs {
    /// Branch that was pushed
    #[arg(long)]
    pub branch: Option<String>,

    /// Commit that was pushed
    #[arg(long)]
    pub commit: Option<String>,
}

/// Subset selection for plan and run.
#[derive(Args, Debug, Default)]
pub struct FilterArgs {
    /// Only run matrix entries with KEY=VALUE (repeatable; same key ORs, different keys AND)
    #[arg(long, value_name = "KEY=VALUE")]
    pub only: Vec<String>,

    /// Only run these workflow jobs (repeatable)
    #[arg(long = "job", value_name = "JOB")]
    pub jobs: Vec<String>,
}

impl FilterArgs {
    pub fn to_filters(&self) -> sonitas_ci::Result<RunFilters> {
        let only = self
            .only
            .iter()
            .map(|raw| matrix::parse_selector(raw))
            .collect::<sonitas_ci::Result<Vec<_>>>()?;
        Ok(RunFilters {
            jobs: self.jobs.clone(),
            only,
        })
    }
}

pub(crate) fn load_workflow(
    global: &GlobalArgs,
    args: &WorkflowArgs,
) -> sonitas_ci::Result<(Workflow, WorkflowSource)> {
    let defaults = defaults::load_defaults();
    workflow::resolve(args.workflow.as_deref(), &global.repo, &defaults)
}

pub(crate) fn resolve_event(repo: &Path, args: &EventArgs) -> sonitas_ci::Result<TriggerEvent> {
    match (&args.branch, &args.commit) {
        (Some(branch), Some(commit)) => Ok(TriggerEvent::push(branch.clone(), commit.clone())),
        _ => {
            let detected = TriggerEvent::from_repo(repo)?;
            Ok(TriggerEvent::push(
                args.branch.clone().unwrap_or_else(|| detected.branch().to_string()),
                args.commit.clone().unwrap_or_else(|| detected.commit().to_string()),
            ))
        }
    }
}

pub mod config;
pub mod init;
pub mod plan;
pub mod run;
pub mod tasks;
pub mod validate;

/// Dispatch a command to its handler and map result to JSON.
macro_rules! dispatch {
    ($args:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run_json($args))
    };
    ($args:expr, $global:expr, $module:ident) => {
        crate::output::map_cmd_result_to_json($module::run($args, $global))
    };
}

pub(crate) fn run_json(
    command: crate::Commands,
    global: &GlobalArgs,
) -> (sonitas_ci::Result<serde_json::Value>, i32) {
    crate::tty::status("sonitas-ci is working...");

    match command {
        // Commands without global context
        crate::Commands::Config(args) => dispatch!(args, config),

        // Commands with global context
        crate::Commands::Run(args) => dispatch!(args, global, run),
        crate::Commands::Plan(args) => dispatch!(args, global, plan),
        crate::Commands::Validate(args) => dispatch!(args, global, validate),
        crate::Commands::Init(args) => dispatch!(args, global, init),
        crate::Commands::Tasks(args) => dispatch!(args, global, tasks),
    }
}
