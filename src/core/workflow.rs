//! Workflow definitions: the declarative pipeline a push fans out from.
//!
//! The on-disk shape follows hosted-CI workflow files (`on`, `env`, `jobs`,
//! `strategy.matrix`, `steps` with `uses`/`run`) plus a `tasks` table for the
//! lint/test task collection that steps can invoke with `task:`.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};

use crate::defaults::Defaults;
use crate::error::{Error, Result};
use crate::matrix::{self, Matrix};
use crate::tasks::{self, TaskDefinition};
use crate::trigger::TriggerSpec;
use crate::utils::io;

/// Workflow shipped with the runner. Mirrors the hosted push pipeline.
pub const DEFAULT_WORKFLOW: &str = r#"name: CI

on: push

jobs:
  build:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ["3.9", "3.10", "3.11", "3.12", "3.13"]
    steps:
      - uses: actions/checkout@v4
      - name: Set up Python ${{ matrix.python-version }}
        uses: actions/setup-python@v5
        with:
          python-version: ${{ matrix.python-version }}
      - name: Display Python version
        run: python -c "import sys; print(sys.version)"
      - name: Install poetry
        run: python -m pip install --upgrade pip poetry
      - name: Install portaudio
        run: sudo apt-get install -y portaudio19-dev python3-all-dev
      - name: Install dependencies
        env:
          POETRY_INSTALLER_NO_BINARY: pyaudio
        run: poetry install
      - name: Lint and test
        task: ci

tasks:
  flake8:
    description: Runs flake8 linter against codebase.
    run: poetry run flake8 --max-line-length 120 --ignore=E704,E722,E731,W503 sonitas
  pylint:
    description: Runs pylint linter against codebase.
    run: poetry run pylint sonitas
  mypy:
    description: Runs the mypy typing linter against the codebase.
    run: poetry run mypy --ignore-missing-imports sonitas
  lint:
    description: Run all configured linters against the codebase.
    needs: [flake8, pylint, mypy]
  test:
    description: Run the test suite.
    run: poetry run pytest tests
  ci:
    description: Lint, then test.
    needs: [lint, test]

default-task: lint
"#;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Workflow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub on: TriggerSpec,
    #[serde(
        default,
        deserialize_with = "scalar_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub env: BTreeMap<String, String>,
    pub jobs: BTreeMap<String, JobDefinition>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub tasks: BTreeMap<String, TaskDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_task: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct JobDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Informational only: jobs always run on the local machine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runs_on: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<Strategy>,
    #[serde(
        default,
        deserialize_with = "scalar_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub env: BTreeMap<String, String>,
    pub steps: Vec<StepDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct Strategy {
    #[serde(default)]
    pub matrix: Matrix,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct StepDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uses: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub with: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(
        default,
        deserialize_with = "scalar_map",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub env: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_directory: Option<String>,
}

impl StepDefinition {
    /// Label used in plans and logs when the step has no explicit name.
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        if let Some(uses) = &self.uses {
            return format!("Run {}", uses);
        }
        if let Some(task) = &self.task {
            return format!("Task {}", task);
        }
        self.run
            .as_deref()
            .and_then(|r| r.lines().next())
            .map(|line| format!("Run {}", line.trim()))
            .unwrap_or_else(|| "Unnamed step".to_string())
    }
}

/// YAML scalar accepted where the model wants a string (`CI: true`, `3.11`).
#[derive(Deserialize)]
#[serde(untagged)]
pub(crate) enum Scalar {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
}

impl Scalar {
    pub(crate) fn into_string(self) -> String {
        match self {
            Scalar::Bool(b) => b.to_string(),
            Scalar::Int(i) => i.to_string(),
            Scalar::Float(f) => f.to_string(),
            Scalar::Str(s) => s,
        }
    }
}

pub(crate) fn scalar_map<'de, D>(deserializer: D) -> std::result::Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<BTreeMap<String, Scalar>>::deserialize(deserializer)?;
    Ok(raw
        .unwrap_or_default()
        .into_iter()
        .map(|(k, v)| (k, v.into_string()))
        .collect())
}

/// Where a loaded workflow came from.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(tag = "kind", content = "path", rename_all = "snake_case")]
pub enum WorkflowSource {
    File(PathBuf),
    Builtin,
}

pub fn parse(yaml: &str, source: &str) -> Result<Workflow> {
    let workflow: Workflow = serde_yml::from_str(yaml)
        .map_err(|e| Error::validation_invalid_yaml(e, Some(format!("parse {}", source))))?;
    validate(&workflow)?;
    Ok(workflow)
}

pub fn builtin() -> Result<Workflow> {
    parse(DEFAULT_WORKFLOW, "built-in workflow")
}

pub fn load_from_path(path: &Path) -> Result<Workflow> {
    if !path.exists() {
        return Err(Error::workflow_not_found(path.display().to_string()));
    }
    let content = io::read_file(path, &format!("read {}", path.display()))?;
    parse(&content, &path.display().to_string())
}

/// Resolve the workflow for a repository.
///
/// Lookup order: explicit path, `<repo>/<workflow_file>`, built-in default.
pub fn resolve(
    explicit: Option<&Path>,
    repo: &Path,
    defaults: &Defaults,
) -> Result<(Workflow, WorkflowSource)> {
    if let Some(path) = explicit {
        let workflow = load_from_path(path)?;
        return Ok((workflow, WorkflowSource::File(path.to_path_buf())));
    }

    let candidate = repo.join(&defaults.workflow_file);
    if candidate.is_file() {
        let workflow = load_from_path(&candidate)?;
        return Ok((workflow, WorkflowSource::File(candidate)));
    }

    Ok((builtin()?, WorkflowSource::Builtin))
}

/// Structural validation. Returns non-fatal warnings.
pub fn validate(workflow: &Workflow) -> Result<Vec<String>> {
    let mut warnings = Vec::new();

    if workflow.jobs.is_empty() {
        return Err(Error::validation_invalid_argument(
            "jobs",
            "Workflow defines no jobs",
            None,
            None,
        ));
    }

    tasks::validate(&workflow.tasks)?;

    if let Some(default_task) = &workflow.default_task {
        if !workflow.tasks.contains_key(default_task) {
            return Err(Error::task_not_found(
                default_task.clone(),
                workflow.tasks.keys().cloned().collect(),
            ));
        }
    }

    for (job_key, job) in &workflow.jobs {
        validate_job(workflow, job_key, job, &mut warnings)?;
    }

    Ok(warnings)
}

fn validate_job(
    workflow: &Workflow,
    job_key: &str,
    job: &JobDefinition,
    warnings: &mut Vec<String>,
) -> Result<()> {
    let field = format!("jobs.{}", job_key);

    if job.steps.is_empty() {
        return Err(Error::validation_invalid_argument(
            field,
            format!("Job '{}' has no steps", job_key),
            None,
            None,
        ));
    }

    if let Some(strategy) = &job.strategy {
        if strategy.max_parallel == Some(0) {
            return Err(Error::validation_invalid_argument(
                format!("{}.strategy.max-parallel", field),
                "max-parallel must be at least 1",
                None,
                None,
            ));
        }
        matrix::expand(&strategy.matrix)?;
    }

    if let Some(runs_on) = &job.runs_on {
        if runs_on != "local" {
            warnings.push(format!(
                "Job '{}' declares runs-on '{}'; steps run on this machine",
                job_key, runs_on
            ));
        }
    }

    let mut seen_ids = HashSet::new();
    for (idx, step) in job.steps.iter().enumerate() {
        let step_field = format!("{}.steps[{}]", field, idx);

        let kinds = [step.uses.is_some(), step.run.is_some(), step.task.is_some()]
            .iter()
            .filter(|set| **set)
            .count();
        if kinds != 1 {
            return Err(Error::validation_invalid_argument(
                step_field,
                "Step must set exactly one of 'uses', 'run', or 'task'",
                step.name.clone(),
                None,
            ));
        }

        if !step.with.is_empty() && step.uses.is_none() {
            return Err(Error::validation_invalid_argument(
                step_field,
                "'with' is only valid on 'uses' steps",
                step.name.clone(),
                None,
            ));
        }

        if let Some(task) = &step.task {
            if !workflow.tasks.contains_key(task) {
                return Err(Error::task_not_found(
                    task.clone(),
                    workflow.tasks.keys().cloned().collect(),
                ));
            }
        }

        if let Some(id) = &step.id {
            if !seen_ids.insert(id.clone()) {
                return Err(Error::validation_invalid_argument(
                    step_field,
                    format!("Duplicate step id '{}'", id),
                    Some(id.clone()),
                    None,
                ));
            }
        }
    }

    Ok(())
}
