use clap::{Args, Subcommand};
use serde::Serialize;

use sonitas_ci::tasks::{self, TaskRunResult};

use super::{CmdResult, GlobalArgs, WorkflowArgs};

#[derive(Args)]
pub struct TasksArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    #[command(subcommand)]
    command: TasksCommand,
}

#[derive(Subcommand)]
enum TasksCommand {
    /// List workflow tasks with their prerequisites
    List,
    /// Run a task (and its prerequisites) in the repository directory
    Run {
        /// Task name (default: the workflow's default-task)
        name: Option<String>,
    },
}

#[derive(Debug, Serialize)]
pub struct TaskEntry {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub run: Vec<String>,
    /// Full execution order, prerequisites first.
    pub order: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum TasksOutput {
    List {
        command: &'static str,
        #[serde(skip_serializing_if = "Option::is_none")]
        default_task: Option<String>,
        tasks: Vec<TaskEntry>,
    },
    Run(TaskRunOutput),
}

#[derive(Debug, Serialize)]
pub struct TaskRunOutput {
    pub command: &'static str,
    #[serde(flatten)]
    pub result: TaskRunResult,
}

pub fn run(args: TasksArgs, global: &GlobalArgs) -> CmdResult<TasksOutput> {
    let (workflow, _) = super::load_workflow(global, &args.workflow)?;

    match args.command {
        TasksCommand::List => {
            let entries = workflow
                .tasks
                .iter()
                .map(|(name, def)| {
                    Ok(TaskEntry {
                        name: name.clone(),
                        description: def.description.clone(),
                        needs: def.needs.clone(),
                        run: def.run.clone(),
                        order: tasks::order(&workflow.tasks, name)?,
                    })
                })
                .collect::<sonitas_ci::Result<Vec<_>>>()?;

            Ok((
                TasksOutput::List {
                    command: "tasks.list",
                    default_task: workflow.default_task.clone(),
                    tasks: entries,
                },
                0,
            ))
        }
        TasksCommand::Run { name } => {
            let name = name.or_else(|| workflow.default_task.clone()).ok_or_else(|| {
                sonitas_ci::Error::validation_missing_argument(vec!["name".to_string()])
                    .with_hint("The workflow has no default-task; name the task to run")
            })?;

            let result = tasks::run(&workflow.tasks, &name, Some(&global.repo), &[])?;
            let exit_code = result.exit_code();

            Ok((
                TasksOutput::Run(TaskRunOutput {
                    command: "tasks.run",
                    result,
                }),
                exit_code,
            ))
        }
    }
}
