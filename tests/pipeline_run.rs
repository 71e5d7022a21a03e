use std::path::Path;
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use sonitas_ci::executor::{LocalExecutor, StepContext, StepExecutor, StepOutcome};
use sonitas_ci::job::ResolvedStep;
use sonitas_ci::pipeline::{self, RunFilters, RunOptions, RunStatus};
use sonitas_ci::utils::command::CommandOutput;
use sonitas_ci::{workflow, TriggerEvent};

const SHELL_WORKFLOW: &str = r#"
name: shell
on:
  push:
    branches: ['**']
env:
  GREETING: hello
jobs:
  build:
    strategy:
      matrix:
        python-version: ["3.9", "3.10", "3.11"]
    steps:
      - name: Record version
        run: echo "$SONITAS_CI_MATRIX_PYTHON_VERSION" > version.txt
      - name: Check rendered value
        run: test "$(cat version.txt)" = "${{ matrix.python-version }}"
      - name: Fail on 3.10
        run: test "${{ matrix.python-version }}" != "3.10"
      - name: Greet
        run: echo "$GREETING ${{ env.GREETING }}"
"#;

fn options(dir: &Path, keep: bool) -> RunOptions {
    RunOptions {
        repo: dir.to_path_buf(),
        work_dir: dir.join("work"),
        keep_workspaces: keep,
        filters: RunFilters::default(),
        max_parallel: None,
        default_max_parallel: None,
    }
}

#[test]
fn local_run_isolates_jobs_and_fails_fast() {
    let dir = tempfile::tempdir().unwrap();
    let wf = workflow::parse(SHELL_WORKFLOW, "test").unwrap();
    let event = TriggerEvent::push("feature/audio", "deadbeef");

    let result = pipeline::run(&wf, &event, &options(dir.path(), true), &LocalExecutor::new()).unwrap();

    assert_eq!(result.status, RunStatus::PartialSuccess);
    assert_eq!(result.jobs.len(), 3);

    let statuses: Vec<&RunStatus> = result.jobs.iter().map(|j| &j.status).collect();
    assert_eq!(statuses, vec![&RunStatus::Success, &RunStatus::Failed, &RunStatus::Success]);

    let failed = &result.jobs[1];
    assert_eq!(failed.steps[2].status, RunStatus::Failed);
    assert_eq!(failed.steps[3].status, RunStatus::Skipped);

    let ok = &result.jobs[0];
    assert_eq!(ok.steps[3].stdout.trim(), "hello hello");

    for job in &result.jobs {
        let ws = job.workspace.as_ref().unwrap();
        let recorded = std::fs::read_to_string(ws.join("src").join("version.txt")).unwrap();
        assert_eq!(recorded.trim(), job.matrix["python-version"]);
    }
}

#[test]
fn workspaces_are_removed_by_default() {
    let dir = tempfile::tempdir().unwrap();
    let wf = workflow::parse(SHELL_WORKFLOW, "test").unwrap();
    let event = TriggerEvent::push("main", "deadbeef");

    let result = pipeline::run(&wf, &event, &options(dir.path(), false), &LocalExecutor::new()).unwrap();

    let run_dir = dir.path().join("work").join(result.run_id.unwrap());
    assert!(!run_dir.exists());
    assert!(result.jobs.iter().all(|j| j.workspace.is_none()));
}

/// Tracks the peak number of steps running at once.
struct ConcurrencyTracker {
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl ConcurrencyTracker {
    fn new() -> Self {
        Self {
            active: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        }
    }
}

impl StepExecutor for ConcurrencyTracker {
    fn execute(&self, _ctx: &StepContext, _step: &ResolvedStep) -> sonitas_ci::Result<StepOutcome> {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(15));
        self.active.fetch_sub(1, Ordering::SeqCst);
        Ok(StepOutcome::from_output(CommandOutput {
            success: true,
            ..Default::default()
        }))
    }
}

#[test]
fn max_parallel_bounds_concurrent_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let wf = workflow::builtin().unwrap();
    let event = TriggerEvent::push("main", "abc");

    let mut opts = options(dir.path(), false);
    opts.max_parallel = Some(2);
    let tracker = ConcurrencyTracker::new();
    let result = pipeline::run(&wf, &event, &opts, &tracker).unwrap();

    assert_eq!(result.status, RunStatus::Success);
    assert_eq!(result.jobs.len(), 5);
    assert!(tracker.peak.load(Ordering::SeqCst) <= 2);
}

#[test]
fn strategy_limit_applies_when_caller_sets_none() {
    let yaml = r#"
jobs:
  build:
    strategy:
      max-parallel: 1
      matrix:
        python-version: ["3.9", "3.10", "3.11"]
    steps:
      - run: "true"
"#;
    let dir = tempfile::tempdir().unwrap();
    let wf = workflow::parse(yaml, "test").unwrap();
    let mut opts = options(dir.path(), false);
    opts.default_max_parallel = Some(3);

    let tracker = ConcurrencyTracker::new();
    pipeline::run(&wf, &TriggerEvent::push("main", "abc"), &opts, &tracker).unwrap();
    assert_eq!(tracker.peak.load(Ordering::SeqCst), 1);
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args(["-c", "user.name=ci", "-c", "user.email=ci@example.com"])
        .args(args)
        .current_dir(dir)
        .output()
        .unwrap();
    assert!(out.status.success(), "git {:?} failed", args);
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

#[test]
fn checkout_action_clones_the_pushed_commit() {
    if Command::new("git").arg("--version").output().is_err() {
        return;
    }

    let repo = tempfile::tempdir().unwrap();
    git(repo.path(), &["init", "--quiet"]);
    std::fs::write(repo.path().join("hello.txt"), "first\n").unwrap();
    git(repo.path(), &["add", "hello.txt"]);
    git(repo.path(), &["commit", "--quiet", "-m", "first"]);
    let first = git(repo.path(), &["rev-parse", "HEAD"]);
    std::fs::write(repo.path().join("hello.txt"), "second\n").unwrap();
    git(repo.path(), &["commit", "--quiet", "-am", "second"]);

    let yaml = r#"
jobs:
  check:
    steps:
      - uses: actions/checkout@v4
      - run: grep -q first hello.txt
      - run: test "$(git rev-parse HEAD)" = "$SONITAS_CI_SHA"
"#;
    let wf = workflow::parse(yaml, "test").unwrap();
    let work = tempfile::tempdir().unwrap();
    let opts = RunOptions {
        repo: repo.path().to_path_buf(),
        work_dir: work.path().to_path_buf(),
        keep_workspaces: false,
        filters: RunFilters::default(),
        max_parallel: None,
        default_max_parallel: None,
    };

    let result = pipeline::run(&wf, &TriggerEvent::push("main", first), &opts, &LocalExecutor::new()).unwrap();

    let job = &result.jobs[0];
    assert_eq!(job.status, RunStatus::Success, "{:?}", job.steps);
}
