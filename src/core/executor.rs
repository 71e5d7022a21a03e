//! Step execution seam.
//!
//! The pipeline drives jobs through a [`StepExecutor`]; [`LocalExecutor`]
//! runs steps on this machine. Tests substitute their own executor to
//! simulate failures without spawning tools.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::actions::ActionRegistry;
use crate::error::Result;
use crate::job::{ResolvedStep, StepAction};
use crate::pipeline::RunStatus;
use crate::tasks::{self, TaskDefinition};
use crate::trigger::TriggerEvent;
use crate::utils::command::{self, CommandOutput};
use crate::workspace::JobWorkspace;

/// Everything a step can see while it runs.
pub struct StepContext<'a> {
    pub job_id: &'a str,
    pub workspace: &'a JobWorkspace,
    pub repo: &'a Path,
    pub event: &'a TriggerEvent,
    pub tasks: &'a BTreeMap<String, TaskDefinition>,
    /// Effective environment: injected, job, earlier exports, then step env.
    pub env: BTreeMap<String, String>,
}

impl StepContext<'_> {
    pub fn env_pairs(&self) -> Vec<(String, String)> {
        self.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
    }

    /// Step working directory, relative to the job checkout.
    pub fn working_dir(&self, step: &ResolvedStep) -> PathBuf {
        match &step.working_directory {
            Some(dir) => self.workspace.src.join(dir),
            None => self.workspace.src.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub status: RunStatus,
    pub output: CommandOutput,
    /// Variables visible to every later step of the same job.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub exports: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl StepOutcome {
    pub fn from_output(output: CommandOutput) -> Self {
        let status = if output.success {
            RunStatus::Success
        } else {
            RunStatus::Failed
        };
        Self {
            status,
            output,
            exports: BTreeMap::new(),
            message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            status: RunStatus::Failed,
            output: CommandOutput {
                stderr: message.clone(),
                exit_code: 1,
                ..Default::default()
            },
            exports: BTreeMap::new(),
            message: Some(message),
        }
    }

    pub fn missing(message: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Missing,
            ..Self::failed(message)
        }
    }

    pub fn with_export(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.exports.insert(key.into(), value.into());
        self
    }
}

pub trait StepExecutor: Send + Sync {
    fn execute(&self, ctx: &StepContext, step: &ResolvedStep) -> Result<StepOutcome>;
}

/// Runs `run` steps through `sh -c`, `uses` steps through the action
/// registry, and `task` steps through the workflow task collection.
pub struct LocalExecutor {
    actions: ActionRegistry,
}

impl LocalExecutor {
    pub fn new() -> Self {
        Self::with_actions(ActionRegistry::builtin())
    }

    /// Use a custom action set instead of the built-in handlers.
    pub fn with_actions(actions: ActionRegistry) -> Self {
        Self { actions }
    }
}

impl Default for LocalExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl StepExecutor for LocalExecutor {
    fn execute(&self, ctx: &StepContext, step: &ResolvedStep) -> Result<StepOutcome> {
        match &step.action {
            StepAction::Run { command } => {
                let dir = ctx.working_dir(step);
                let output = command::run_shell(command, Some(&dir), &ctx.env_pairs());
                Ok(StepOutcome::from_output(output))
            }
            StepAction::Uses { action, with } => match self.actions.get(action) {
                Some(handler) => handler.run(ctx, with),
                None => Ok(StepOutcome::missing(format!(
                    "No handler for action '{}' (available: {})",
                    action,
                    self.actions.names().join(", ")
                ))),
            },
            StepAction::Task { task } => {
                let dir = ctx.working_dir(step);
                let result = tasks::run(ctx.tasks, task, Some(&dir), &ctx.env_pairs())?;
                let (stdout, stderr) = result.combined_output();
                let output = CommandOutput {
                    stdout,
                    stderr,
                    success: result.success,
                    exit_code: result.exit_code(),
                    duration_ms: result.commands.iter().map(|c| c.duration_ms).sum(),
                };
                Ok(StepOutcome::from_output(output))
            }
        }
    }
}
