//! Job instances: one matrix entry bound to a job definition.
//!
//! Building an instance renders every `${{ ... }}` expression up front, so a
//! plan shows exactly the commands a run would execute and a bad reference
//! fails before anything is spawned.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::error::Result;
use crate::matrix::MatrixEntry;
use crate::utils::slugify;
use crate::utils::template;
use crate::workflow::{JobDefinition, StepDefinition};

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct JobInstance {
    /// Slug of job key plus matrix values, e.g. `build-3-9`.
    /// [`crate::pipeline::instantiate`] suffixes ids that collide.
    pub id: String,
    pub job_key: String,
    pub display_name: String,
    pub entry: MatrixEntry,
    /// Workflow env overlaid with job env.
    pub env: BTreeMap<String, String>,
    pub steps: Vec<ResolvedStep>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ResolvedStep {
    pub index: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    pub action: StepAction,
    /// Step-level env only; the job env is applied underneath at run time.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub env: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepAction {
    Uses {
        action: String,
        #[serde(skip_serializing_if = "BTreeMap::is_empty")]
        with: BTreeMap<String, String>,
    },
    Run {
        command: String,
    },
    Task {
        task: String,
    },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Uses { .. } => "uses",
            StepAction::Run { .. } => "run",
            StepAction::Task { .. } => "task",
        }
    }
}

impl JobInstance {
    pub fn new(
        job_key: &str,
        definition: &JobDefinition,
        entry: MatrixEntry,
        workflow_env: &BTreeMap<String, String>,
    ) -> Result<Self> {
        let field = format!("jobs.{}", job_key);
        let matrix = &entry.values;

        let mut env = BTreeMap::new();
        merge_env(&mut env, workflow_env, matrix, "env")?;
        merge_env(&mut env, &definition.env, matrix, &format!("{}.env", field))?;

        let id = if entry.is_empty() {
            slugify::slugify_id(job_key, "job")?
        } else {
            let values: Vec<&str> = matrix.values().map(String::as_str).collect();
            slugify::slugify_id(&format!("{} {}", job_key, values.join(" ")), "job")?
        };

        let display_name = match &definition.name {
            Some(name) => {
                let rendered = render(name, matrix, &env, &format!("{}.name", field))?;
                if entry.is_empty() || name.contains("matrix.") {
                    rendered
                } else {
                    format!("{} ({})", rendered, entry.label())
                }
            }
            None if entry.is_empty() => job_key.to_string(),
            None => format!("{} ({})", job_key, entry.label()),
        };

        let steps = definition
            .steps
            .iter()
            .enumerate()
            .map(|(index, step)| {
                resolve_step(index, step, matrix, &env, &format!("{}.steps[{}]", field, index))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(JobInstance {
            id,
            job_key: job_key.to_string(),
            display_name,
            entry,
            env,
            steps,
        })
    }
}

fn render(
    value: &str,
    matrix: &BTreeMap<String, String>,
    env: &BTreeMap<String, String>,
    field: &str,
) -> Result<String> {
    template::render(value, &[("matrix", matrix), ("env", env)], field)
}

/// Render `source` into `env`. Values may reference keys merged earlier.
fn merge_env(
    env: &mut BTreeMap<String, String>,
    source: &BTreeMap<String, String>,
    matrix: &BTreeMap<String, String>,
    field: &str,
) -> Result<()> {
    let snapshot = env.clone();
    for (key, value) in source {
        let rendered = render(value, matrix, &snapshot, &format!("{}.{}", field, key))?;
        env.insert(key.clone(), rendered);
    }
    Ok(())
}

fn resolve_step(
    index: usize,
    step: &StepDefinition,
    matrix: &BTreeMap<String, String>,
    job_env: &BTreeMap<String, String>,
    field: &str,
) -> Result<ResolvedStep> {
    let mut step_env = BTreeMap::new();
    for (key, value) in &step.env {
        let rendered = render(value, matrix, job_env, &format!("{}.env.{}", field, key))?;
        step_env.insert(key.clone(), rendered);
    }

    let mut scope_env = job_env.clone();
    scope_env.extend(step_env.clone());

    let action = if let Some(uses) = &step.uses {
        let mut with = BTreeMap::new();
        for (key, value) in &step.with {
            let rendered = render(value, matrix, &scope_env, &format!("{}.with.{}", field, key))?;
            with.insert(key.clone(), rendered);
        }
        StepAction::Uses {
            action: uses.trim().to_string(),
            with,
        }
    } else if let Some(task) = &step.task {
        StepAction::Task {
            task: render(task, matrix, &scope_env, &format!("{}.task", field))?,
        }
    } else {
        let command = step.run.as_deref().unwrap_or_default();
        StepAction::Run {
            command: render(command, matrix, &scope_env, &format!("{}.run", field))?,
        }
    };

    let working_directory = step
        .working_directory
        .as_deref()
        .map(|dir| render(dir, matrix, &scope_env, &format!("{}.working-directory", field)))
        .transpose()?;

    Ok(ResolvedStep {
        index,
        id: step.id.clone(),
        name: render(&step.label(), matrix, &scope_env, &format!("{}.name", field))?,
        action,
        env: step_env,
        working_directory,
    })
}
