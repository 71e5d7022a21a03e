//! Run orchestration: trigger matching, matrix fan-out, per-job fail-fast.
//!
//! Jobs are independent: each gets its own workspace, environment, and
//! `PATH`, and a failure in one never stops another. Steps inside a job run
//! strictly in order; after the first unsuccessful step the rest are skipped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Hint, Result};
use crate::executor::{StepContext, StepExecutor};
use crate::job::JobInstance;
use crate::matrix;
use crate::tasks::TaskDefinition;
use crate::trigger::{self, TriggerEvent};
use crate::utils::slugify;
use crate::workflow::Workflow;
use crate::workspace::{JobWorkspace, RunWorkspace};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    PartialSuccess,
    Failed,
    Skipped,
    Missing,
}

impl RunStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, RunStatus::Success)
    }
}

/// Narrow a run to part of the workflow.
#[derive(Debug, Clone, Default)]
pub struct RunFilters {
    /// Job keys to keep. Empty keeps every job.
    pub jobs: Vec<String>,
    /// `key=value` matrix selectors (see [`matrix::matches`]).
    pub only: Vec<(String, String)>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunPlan {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub event: TriggerEvent,
    pub triggered: bool,
    pub jobs: Vec<JobInstance>,
    /// Smallest `strategy.max-parallel` among planned jobs.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub repo: PathBuf,
    pub work_dir: PathBuf,
    pub keep_workspaces: bool,
    pub filters: RunFilters,
    /// Explicit limit; wins over the workflow strategy.
    pub max_parallel: Option<usize>,
    /// Used when neither the caller nor the workflow sets a limit.
    pub default_max_parallel: Option<usize>,
}

/// Shared, read-only inputs for every job of a run.
pub struct RunContext<'a> {
    pub run_id: &'a str,
    pub repo: &'a Path,
    pub event: &'a TriggerEvent,
    pub tasks: &'a BTreeMap<String, TaskDefinition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepResult {
    pub index: usize,
    pub name: String,
    pub kind: String,
    pub status: RunStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub hints: Vec<Hint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JobResult {
    pub id: String,
    pub job_key: String,
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub matrix: BTreeMap<String, String>,
    pub status: RunStatus,
    pub steps: Vec<StepResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workspace: Option<PathBuf>,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunResult {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    pub event: TriggerEvent,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub jobs: Vec<JobResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
    pub summary: RunSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub total_jobs: usize,
    pub succeeded: usize,
    pub failed: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failed_jobs: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub next_actions: Vec<String>,
}

/// Resolve which jobs a push would run, without running anything.
pub fn plan(workflow: &Workflow, event: &TriggerEvent, filters: &RunFilters) -> Result<RunPlan> {
    let mut warnings = crate::workflow::validate(workflow)?;

    for key in &filters.jobs {
        if !workflow.jobs.contains_key(key) {
            return Err(Error::job_not_found(
                key.clone(),
                workflow.jobs.keys().cloned().collect(),
            ));
        }
    }

    if !trigger::matches(&workflow.on, event) {
        warnings.push(format!(
            "Push to '{}' does not match the workflow trigger; nothing to run",
            event.branch()
        ));
        return Ok(RunPlan {
            workflow: workflow.name.clone(),
            event: event.clone(),
            triggered: false,
            jobs: Vec::new(),
            max_parallel: None,
            warnings,
        });
    }

    let (all, id_warnings) = instantiate(workflow)?;
    warnings.extend(id_warnings);

    let mut jobs = Vec::new();
    let mut max_parallel: Option<usize> = None;

    for job in all {
        if !filters.jobs.is_empty() && !filters.jobs.contains(&job.job_key) {
            continue;
        }
        if !matrix::matches(&job.entry, &filters.only) {
            continue;
        }

        let limit = workflow
            .jobs
            .get(&job.job_key)
            .and_then(|definition| definition.strategy.as_ref())
            .and_then(|strategy| strategy.max_parallel);
        if let Some(limit) = limit {
            max_parallel = Some(max_parallel.map_or(limit, |current| current.min(limit)));
        }

        jobs.push(job);
    }

    if jobs.is_empty() {
        let selectors: Vec<String> = filters
            .only
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        return Err(Error::validation_invalid_argument(
            "only",
            "No jobs match the given selectors",
            None,
            Some(selectors),
        ));
    }

    Ok(RunPlan {
        workflow: workflow.name.clone(),
        event: event.clone(),
        triggered: true,
        jobs,
        max_parallel,
        warnings,
    })
}

/// Every job instance the workflow defines, in job key then matrix order.
///
/// Ids are unique within the result: an id already taken gets the next free
/// `-N` suffix and a warning naming both jobs.
pub fn instantiate(workflow: &Workflow) -> Result<(Vec<JobInstance>, Vec<String>)> {
    let mut owners: BTreeMap<String, String> = BTreeMap::new();
    let mut jobs = Vec::new();
    let mut warnings = Vec::new();

    for (key, definition) in &workflow.jobs {
        let entries = match &definition.strategy {
            Some(strategy) => matrix::expand(&strategy.matrix)?,
            None => matrix::expand(&Default::default())?,
        };

        for entry in entries {
            let mut job = JobInstance::new(key, definition, entry, &workflow.env)?;
            if let Some(owner) = owners.get(&job.id) {
                let taken = job.id.clone();
                let mut suffix = 2;
                while owners.contains_key(&format!("{}-{}", taken, suffix)) {
                    suffix += 1;
                }
                job.id = format!("{}-{}", taken, suffix);
                warnings.push(format!(
                    "'{}' and '{}' both map to job id '{}'; '{}' uses '{}'",
                    owner, job.display_name, taken, job.display_name, job.id
                ));
            }
            owners.insert(job.id.clone(), job.display_name.clone());
            jobs.push(job);
        }
    }

    Ok((jobs, warnings))
}

/// Plan, then execute every job concurrently (bounded), each job's steps in order.
pub fn run(
    workflow: &Workflow,
    event: &TriggerEvent,
    options: &RunOptions,
    executor: &dyn StepExecutor,
) -> Result<RunResult> {
    let started_at = Utc::now();
    let plan = plan(workflow, event, &options.filters)?;
    let mut warnings = plan.warnings.clone();

    if !plan.triggered {
        return Ok(build_result(None, event, started_at, Vec::new(), warnings));
    }

    let limit = options
        .max_parallel
        .or(plan.max_parallel)
        .or(options.default_max_parallel)
        .unwrap_or(plan.jobs.len())
        .clamp(1, plan.jobs.len());

    let run_ws = RunWorkspace::create(&options.work_dir, options.keep_workspaces)?;

    log_status!(
        "run",
        "{} job(s), up to {} at a time (run {})",
        plan.jobs.len(),
        limit,
        run_ws.run_id
    );

    let ctx = RunContext {
        run_id: &run_ws.run_id,
        repo: &options.repo,
        event,
        tasks: &workflow.tasks,
    };

    let executed = plan
        .jobs
        .iter()
        .map(|job| run_ws.job(&job.id))
        .collect::<Result<Vec<_>>>()
        .and_then(|workspaces| {
            let results = execute_jobs(&plan.jobs, &workspaces, limit, executor, &ctx)?;
            Ok((results, workspaces))
        });

    let (mut results, job_workspaces) = match executed {
        Ok(done) => done,
        Err(err) => {
            if let Err(cleanup) = run_ws.finish() {
                log_status!("workspace", "Could not remove run workspace: {}", cleanup.message);
            }
            return Err(err);
        }
    };

    match run_ws.finish() {
        Ok(true) => {}
        Ok(false) => {
            for (result, ws) in results.iter_mut().zip(&job_workspaces) {
                result.workspace = Some(ws.root.clone());
            }
        }
        Err(e) => warnings.push(format!("Could not remove run workspace: {}", e.message)),
    }

    Ok(build_result(
        Some(run_ws.run_id.clone()),
        event,
        started_at,
        results,
        warnings,
    ))
}

fn execute_jobs(
    jobs: &[JobInstance],
    workspaces: &[JobWorkspace],
    limit: usize,
    executor: &dyn StepExecutor,
    ctx: &RunContext,
) -> Result<Vec<JobResult>> {
    let counter = AtomicUsize::new(0);
    let next = &counter;

    let collected: Vec<(usize, JobResult)> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..limit)
            .map(|_| {
                scope.spawn(move || {
                    let mut done = Vec::new();
                    loop {
                        let idx = next.fetch_add(1, Ordering::SeqCst);
                        if idx >= jobs.len() {
                            break;
                        }
                        done.push((idx, run_job(&jobs[idx], executor, &workspaces[idx], ctx)));
                    }
                    done
                })
            })
            .collect();

        let mut all = Vec::with_capacity(jobs.len());
        let mut panicked = false;
        for handle in handles {
            match handle.join() {
                Ok(done) => all.extend(done),
                Err(_) => panicked = true,
            }
        }
        if panicked {
            return Err(Error::internal_unexpected("Job worker thread panicked"));
        }
        Ok(all)
    })?;

    let mut ordered = collected;
    ordered.sort_by_key(|(idx, _)| *idx);
    Ok(ordered.into_iter().map(|(_, result)| result).collect())
}

/// Execute one job's steps in order, skipping everything after the first failure.
pub fn run_job(
    job: &JobInstance,
    executor: &dyn StepExecutor,
    workspace: &JobWorkspace,
    ctx: &RunContext,
) -> JobResult {
    let started_at = Utc::now();
    let started = Instant::now();
    let base_env = job_environment(job, workspace, ctx);
    let mut exports: BTreeMap<String, String> = BTreeMap::new();
    let mut failed_step: Option<String> = None;
    let mut steps = Vec::with_capacity(job.steps.len());

    log_status!("job", "{} started", job.display_name);

    for step in &job.steps {
        if let Some(failed) = &failed_step {
            steps.push(StepResult {
                index: step.index,
                name: step.name.clone(),
                kind: step.action.kind().to_string(),
                status: RunStatus::Skipped,
                exit_code: None,
                duration_ms: 0,
                stdout: String::new(),
                stderr: String::new(),
                warnings: vec![format!("Skipped because '{}' did not succeed", failed)],
                hints: Vec::new(),
                error: None,
            });
            continue;
        }

        let mut env = base_env.clone();
        env.extend(exports.clone());
        env.extend(step.env.clone());

        let step_ctx = StepContext {
            job_id: &job.id,
            workspace,
            repo: ctx.repo,
            event: ctx.event,
            tasks: ctx.tasks,
            env,
        };

        log_status!("job", "{} > {}", job.display_name, step.name);

        let result = match executor.execute(&step_ctx, step) {
            Ok(outcome) => {
                exports.extend(outcome.exports);
                StepResult {
                    index: step.index,
                    name: step.name.clone(),
                    kind: step.action.kind().to_string(),
                    status: outcome.status,
                    exit_code: Some(outcome.output.exit_code),
                    duration_ms: outcome.output.duration_ms,
                    stdout: outcome.output.stdout,
                    stderr: outcome.output.stderr,
                    warnings: Vec::new(),
                    hints: Vec::new(),
                    error: outcome.message,
                }
            }
            Err(err) => StepResult {
                index: step.index,
                name: step.name.clone(),
                kind: step.action.kind().to_string(),
                status: RunStatus::Failed,
                exit_code: None,
                duration_ms: 0,
                stdout: String::new(),
                stderr: String::new(),
                warnings: Vec::new(),
                hints: err.hints,
                error: Some(err.message),
            },
        };

        if !result.status.is_success() {
            log_status!("job", "{} > {} {:?}", job.display_name, step.name, result.status);
            failed_step = Some(step.name.clone());
        }
        steps.push(result);
    }

    let status = if failed_step.is_some() {
        RunStatus::Failed
    } else {
        RunStatus::Success
    };
    log_status!("job", "{} finished: {:?}", job.display_name, status);

    JobResult {
        id: job.id.clone(),
        job_key: job.job_key.clone(),
        name: job.display_name.clone(),
        matrix: job.entry.values.clone(),
        status,
        steps,
        workspace: None,
        started_at,
        duration_ms: started.elapsed().as_millis() as u64,
    }
}

/// Injected runner variables, overlaid by the job's own env.
fn job_environment(
    job: &JobInstance,
    workspace: &JobWorkspace,
    ctx: &RunContext,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("CI".to_string(), "true".to_string()),
        ("SONITAS_CI".to_string(), "true".to_string()),
        ("SONITAS_CI_RUN_ID".to_string(), ctx.run_id.to_string()),
        ("SONITAS_CI_JOB".to_string(), job.id.clone()),
        (
            "SONITAS_CI_WORKSPACE".to_string(),
            workspace.src.display().to_string(),
        ),
        ("SONITAS_CI_REF".to_string(), ctx.event.git_ref()),
        ("SONITAS_CI_SHA".to_string(), ctx.event.commit().to_string()),
    ]);
    for (axis, value) in &job.entry.values {
        env.insert(
            format!("SONITAS_CI_MATRIX_{}", slugify::env_key(axis)),
            value.clone(),
        );
    }
    env.extend(job.env.clone());
    env
}

pub fn derive_overall_status(jobs: &[JobResult]) -> RunStatus {
    if jobs.is_empty() {
        return RunStatus::Skipped;
    }

    let succeeded = jobs.iter().filter(|j| j.status.is_success()).count();
    if succeeded == jobs.len() {
        RunStatus::Success
    } else if succeeded == 0 {
        RunStatus::Failed
    } else {
        RunStatus::PartialSuccess
    }
}

fn build_summary(jobs: &[JobResult]) -> RunSummary {
    let failed: Vec<&JobResult> = jobs.iter().filter(|j| !j.status.is_success()).collect();

    // One command per job: selectors on different axes AND together, so a
    // single command for several failed entries would also select passing ones.
    let mut next_actions: Vec<String> = failed.iter().map(|j| rerun_command(j)).collect();
    if !failed.is_empty() {
        next_actions.push("Keep workspaces for inspection: sonitas-ci run --keep-workspaces".to_string());
    }

    RunSummary {
        total_jobs: jobs.len(),
        succeeded: jobs.len() - failed.len(),
        failed: failed.len(),
        failed_jobs: failed.iter().map(|j| j.name.clone()).collect(),
        next_actions,
    }
}

fn rerun_command(job: &JobResult) -> String {
    let mut command = format!("Re-run {}: sonitas-ci run --job {}", job.name, job.job_key);
    for (axis, value) in &job.matrix {
        command.push_str(&format!(" --only {}={}", axis, value));
    }
    command
}

fn build_result(
    run_id: Option<String>,
    event: &TriggerEvent,
    started_at: DateTime<Utc>,
    jobs: Vec<JobResult>,
    warnings: Vec<String>,
) -> RunResult {
    RunResult {
        run_id,
        event: event.clone(),
        status: derive_overall_status(&jobs),
        started_at,
        finished_at: Utc::now(),
        summary: build_summary(&jobs),
        jobs,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::StepOutcome;
    use crate::job::ResolvedStep;
    use crate::utils::command::CommandOutput;
    use crate::workflow;
    use std::sync::Mutex;

    /// Succeeds every step, except `fail_at` (job id, step index).
    struct FakeExecutor {
        fail_at: Option<(String, usize)>,
        calls: Mutex<Vec<(String, usize)>>,
    }

    impl FakeExecutor {
        fn new(fail_at: Option<(&str, usize)>) -> Self {
            Self {
                fail_at: fail_at.map(|(job, idx)| (job.to_string(), idx)),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl StepExecutor for FakeExecutor {
        fn execute(&self, ctx: &StepContext, step: &ResolvedStep) -> Result<StepOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push((ctx.job_id.to_string(), step.index));
            let fail = self
                .fail_at
                .as_ref()
                .is_some_and(|(job, idx)| job == ctx.job_id && *idx == step.index);
            Ok(StepOutcome::from_output(CommandOutput {
                success: !fail,
                exit_code: if fail { 1 } else { 0 },
                ..Default::default()
            }))
        }
    }

    fn options(dir: &Path) -> RunOptions {
        RunOptions {
            repo: dir.to_path_buf(),
            work_dir: dir.join("work"),
            keep_workspaces: false,
            filters: RunFilters::default(),
            max_parallel: None,
            default_max_parallel: None,
        }
    }

    #[test]
    fn push_creates_one_job_per_version() {
        let wf = workflow::builtin().unwrap();
        let plan = plan(&wf, &TriggerEvent::push("main", "abc"), &RunFilters::default()).unwrap();
        let ids: Vec<&str> = plan.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["build-3-9", "build-3-10", "build-3-11", "build-3-12", "build-3-13"]);
    }

    #[test]
    fn replanning_is_deterministic() {
        let wf = workflow::builtin().unwrap();
        let event = TriggerEvent::push("main", "abc");
        let a = plan(&wf, &event, &RunFilters::default()).unwrap();
        let b = plan(&wf, &event, &RunFilters::default()).unwrap();
        assert_eq!(a.jobs, b.jobs);
    }

    #[test]
    fn all_jobs_succeeding_is_success() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow::builtin().unwrap();
        let executor = FakeExecutor::new(None);
        let result = run(&wf, &TriggerEvent::push("main", "abc"), &options(dir.path()), &executor).unwrap();

        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.jobs.len(), 5);
        assert!(result.jobs.iter().all(|j| j.steps.len() == 7));
        assert_eq!(executor.calls.lock().unwrap().len(), 35);
        assert_eq!(result.summary.succeeded, 5);
        assert!(result.summary.next_actions.is_empty());
    }

    #[test]
    fn failure_in_one_job_leaves_others_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow::builtin().unwrap();
        // Step 5 is dependency installation.
        let executor = FakeExecutor::new(Some(("build-3-9", 5)));
        let result = run(&wf, &TriggerEvent::push("main", "abc"), &options(dir.path()), &executor).unwrap();

        assert_eq!(result.status, RunStatus::PartialSuccess);
        let failed = &result.jobs[0];
        assert_eq!(failed.matrix["python-version"], "3.9");
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.steps[5].status, RunStatus::Failed);
        assert_eq!(failed.steps[6].status, RunStatus::Skipped);
        assert!(failed.steps[6].warnings[0].contains("Install dependencies"));

        for job in &result.jobs[1..] {
            assert_eq!(job.status, RunStatus::Success);
            assert!(job.steps.iter().all(|s| s.status == RunStatus::Success));
        }

        let calls = executor.calls.lock().unwrap();
        assert!(!calls.contains(&("build-3-9".to_string(), 6)));
        assert_eq!(result.summary.failed_jobs, vec!["build (3.9)"]);
        assert_eq!(
            result.summary.next_actions[0],
            "Re-run build (3.9): sonitas-ci run --job build --only python-version=3.9"
        );
    }

    #[test]
    fn results_follow_matrix_order_with_single_worker() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow::builtin().unwrap();
        let mut opts = options(dir.path());
        opts.max_parallel = Some(1);
        let executor = FakeExecutor::new(None);
        let result = run(&wf, &TriggerEvent::push("main", "abc"), &opts, &executor).unwrap();

        let calls = executor.calls.lock().unwrap();
        let job_order: Vec<&str> = calls.iter().step_by(7).map(|(job, _)| job.as_str()).collect();
        assert_eq!(job_order, vec!["build-3-9", "build-3-10", "build-3-11", "build-3-12", "build-3-13"]);
        assert!(result.jobs.windows(2).all(|w| w[0].id != w[1].id));
    }

    #[test]
    fn rerun_hint_selects_each_failed_entry_exactly() {
        let yaml = r#"
jobs:
  build:
    strategy:
      matrix:
        os: [linux, mac]
        python-version: ["3.9", "3.13"]
    steps:
      - run: "true"
"#;
        let wf = workflow::parse(yaml, "test").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let executor = FailJobs(vec!["build-linux-3-9", "build-mac-3-13"]);
        let result = run(&wf, &TriggerEvent::push("main", "abc"), &options(dir.path()), &executor).unwrap();

        assert_eq!(result.summary.failed, 2);
        assert_eq!(
            result.summary.next_actions[..2],
            [
                "Re-run build (linux, 3.9): sonitas-ci run --job build --only os=linux --only python-version=3.9",
                "Re-run build (mac, 3.13): sonitas-ci run --job build --only os=mac --only python-version=3.13",
            ]
        );
    }

    /// Fails every step of the listed job ids.
    struct FailJobs(Vec<&'static str>);

    impl StepExecutor for FailJobs {
        fn execute(&self, ctx: &StepContext, _step: &ResolvedStep) -> Result<StepOutcome> {
            let fail = self.0.iter().any(|id| *id == ctx.job_id);
            Ok(StepOutcome::from_output(CommandOutput {
                success: !fail,
                exit_code: if fail { 1 } else { 0 },
                ..Default::default()
            }))
        }
    }

    #[test]
    fn colliding_matrix_values_get_distinct_ids() {
        let yaml = r#"
jobs:
  build:
    strategy:
      matrix:
        v: ["3.1", "3-1", "3.2"]
    steps:
      - run: "true"
"#;
        let wf = workflow::parse(yaml, "test").unwrap();
        let plan = plan(&wf, &TriggerEvent::push("main", "abc"), &RunFilters::default()).unwrap();
        let ids: Vec<&str> = plan.jobs.iter().map(|j| j.id.as_str()).collect();
        assert_eq!(ids, vec!["build-3-1", "build-3-1-2", "build-3-2"]);
        assert!(plan.warnings.iter().any(|w| w.contains("build (3-1)") && w.contains("build-3-1-2")));

        let dir = tempfile::tempdir().unwrap();
        let result = run(&wf, &TriggerEvent::push("main", "abc"), &options(dir.path()), &FakeExecutor::new(None)).unwrap();
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.jobs.len(), 3);
    }

    #[test]
    fn colliding_job_keys_get_distinct_ids() {
        let yaml = r#"
jobs:
  lint_check:
    steps:
      - run: "true"
  lint-check:
    steps:
      - run: "true"
"#;
        let wf = workflow::parse(yaml, "test").unwrap();
        let plan = plan(&wf, &TriggerEvent::push("main", "abc"), &RunFilters::default()).unwrap();
        let ids: Vec<(&str, &str)> = plan
            .jobs
            .iter()
            .map(|j| (j.job_key.as_str(), j.id.as_str()))
            .collect();
        assert_eq!(ids, vec![("lint-check", "lint-check"), ("lint_check", "lint-check-2")]);

        // Ids do not shift when a filter removes the first owner.
        let only_second = RunFilters {
            jobs: vec!["lint_check".to_string()],
            only: Vec::new(),
        };
        let narrowed = super::plan(&wf, &TriggerEvent::push("main", "abc"), &only_second).unwrap();
        assert_eq!(narrowed.jobs[0].id, "lint-check-2");

        let dir = tempfile::tempdir().unwrap();
        let result = run(&wf, &TriggerEvent::push("main", "abc"), &options(dir.path()), &FakeExecutor::new(None)).unwrap();
        assert_eq!(result.status, RunStatus::Success);
        assert_eq!(result.jobs.len(), 2);
    }

    /// Panics on the second job to simulate a crashing executor.
    struct PanicOnSecondJob;

    impl StepExecutor for PanicOnSecondJob {
        fn execute(&self, ctx: &StepContext, _step: &ResolvedStep) -> Result<StepOutcome> {
            if ctx.job_id == "build-3-10" {
                panic!("executor crashed");
            }
            Ok(StepOutcome::from_output(CommandOutput {
                success: true,
                ..Default::default()
            }))
        }
    }

    #[test]
    fn failed_run_removes_its_workspace() {
        let dir = tempfile::tempdir().unwrap();
        let wf = workflow::builtin().unwrap();
        let opts = options(dir.path());

        let err = run(&wf, &TriggerEvent::push("main", "abc"), &opts, &PanicOnSecondJob).unwrap_err();
        assert_eq!(err.code.as_str(), "internal.unexpected");

        let leftover = std::fs::read_dir(&opts.work_dir).unwrap().count();
        assert_eq!(leftover, 0);
    }

    #[test]
    fn unmatched_trigger_is_skipped() {
        let yaml = "on:\n  push:\n    branches-ignore: ['wip/**']\njobs:\n  one:\n    steps:\n      - run: \"true\"\n";
        let wf = workflow::parse(yaml, "test").unwrap();
        let dir = tempfile::tempdir().unwrap();
        let executor = FakeExecutor::new(None);
        let result = run(&wf, &TriggerEvent::push("wip/x", "abc"), &options(dir.path()), &executor).unwrap();

        assert_eq!(result.status, RunStatus::Skipped);
        assert!(result.jobs.is_empty());
        assert!(result.run_id.is_none());
        assert!(executor.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn only_selector_narrows_jobs() {
        let wf = workflow::builtin().unwrap();
        let filters = RunFilters {
            jobs: Vec::new(),
            only: vec![("python-version".to_string(), "3.12".to_string())],
        };
        let plan = plan(&wf, &TriggerEvent::push("main", "abc"), &filters).unwrap();
        assert_eq!(plan.jobs.len(), 1);
        assert_eq!(plan.jobs[0].entry.index, 3);

        let none = RunFilters {
            jobs: Vec::new(),
            only: vec![("python-version".to_string(), "2.7".to_string())],
        };
        assert!(super::plan(&wf, &TriggerEvent::push("main", "abc"), &none).is_err());
    }

    #[test]
    fn unknown_job_filter_is_not_found() {
        let wf = workflow::builtin().unwrap();
        let filters = RunFilters {
            jobs: vec!["deploy".to_string()],
            only: Vec::new(),
        };
        let err = plan(&wf, &TriggerEvent::push("main", "abc"), &filters).unwrap_err();
        assert_eq!(err.code.as_str(), "job.not_found");
    }

    #[test]
    fn overall_status_derivation() {
        let job = |status| JobResult {
            id: "j".to_string(),
            job_key: "j".to_string(),
            name: "j".to_string(),
            matrix: BTreeMap::new(),
            status,
            steps: Vec::new(),
            workspace: None,
            started_at: Utc::now(),
            duration_ms: 0,
        };
        assert_eq!(derive_overall_status(&[]), RunStatus::Skipped);
        assert_eq!(derive_overall_status(&[job(RunStatus::Success)]), RunStatus::Success);
        assert_eq!(
            derive_overall_status(&[job(RunStatus::Success), job(RunStatus::Failed)]),
            RunStatus::PartialSuccess
        );
        assert_eq!(
            derive_overall_status(&[job(RunStatus::Failed), job(RunStatus::Failed)]),
            RunStatus::Failed
        );
    }

    #[test]
    fn injected_environment_names_matrix_values() {
        let wf = workflow::builtin().unwrap();
        let plan = plan(&wf, &TriggerEvent::push("main", "abc"), &RunFilters::default()).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let run_ws = RunWorkspace::create(dir.path(), false).unwrap();
        let ws = run_ws.job(&plan.jobs[1].id).unwrap();
        let event = TriggerEvent::push("main", "abc");
        let ctx = RunContext {
            run_id: &run_ws.run_id,
            repo: dir.path(),
            event: &event,
            tasks: &wf.tasks,
        };

        let env = job_environment(&plan.jobs[1], &ws, &ctx);
        assert_eq!(env["CI"], "true");
        assert_eq!(env["SONITAS_CI_MATRIX_PYTHON_VERSION"], "3.10");
        assert_eq!(env["SONITAS_CI_JOB"], "build-3-10");
        assert_eq!(env["SONITAS_CI_REF"], "refs/heads/main");
        assert_eq!(env["SONITAS_CI_SHA"], "abc");
    }
}
