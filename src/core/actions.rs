//! Built-in handlers for `uses:` steps.
//!
//! Handlers are keyed by action name without the version suffix, so
//! `actions/checkout@v4` and `actions/checkout@v3` share a handler.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::executor::{StepContext, StepOutcome};
use crate::utils::command::{self, CommandOutput};
use crate::utils::shell;

pub trait ActionHandler: Send + Sync {
    fn run(&self, ctx: &StepContext, with: &BTreeMap<String, String>) -> Result<StepOutcome>;
}

#[derive(Clone, Default)]
pub struct ActionRegistry {
    handlers: BTreeMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn builtin() -> Self {
        let mut registry = Self::default();
        registry.register("actions/checkout", Arc::new(Checkout));
        registry.register("actions/setup-python", Arc::new(SetupPython));
        registry
    }

    pub fn register(&mut self, name: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(name.to_string(), handler);
    }

    pub fn get(&self, uses: &str) -> Option<&Arc<dyn ActionHandler>> {
        self.handlers.get(action_name(uses))
    }

    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }
}

/// `actions/checkout@v4` -> `actions/checkout`.
pub fn action_name(uses: &str) -> &str {
    uses.split_once('@').map(|(name, _)| name).unwrap_or(uses).trim()
}

/// Clone the repository into the job checkout and detach at the pushed commit.
///
/// `with.ref` overrides the commit.
pub struct Checkout;

impl ActionHandler for Checkout {
    fn run(&self, ctx: &StepContext, with: &BTreeMap<String, String>) -> Result<StepOutcome> {
        let commit = with
            .get("ref")
            .map(String::as_str)
            .unwrap_or_else(|| ctx.event.commit());
        let src = ctx.workspace.src.display().to_string();
        let env = ctx.env_pairs();

        let clone_args = vec![
            "clone".to_string(),
            "--quiet".to_string(),
            "--no-checkout".to_string(),
            ctx.repo.display().to_string(),
            src,
        ];
        log_status!("checkout", "{}: {}", ctx.job_id, shell::command_line("git", &clone_args));

        let clone = command::run_program("git", &clone_args, None, &env);
        if !clone.success {
            return Ok(StepOutcome::from_output(clone));
        }

        let checkout_args = vec![
            "checkout".to_string(),
            "--quiet".to_string(),
            "--detach".to_string(),
            commit.to_string(),
        ];
        log_status!("checkout", "{}: {}", ctx.job_id, shell::command_line("git", &checkout_args));
        let checkout = command::run_program("git", &checkout_args, Some(&ctx.workspace.src), &env);

        Ok(StepOutcome::from_output(CommandOutput {
            stdout: format!("{}{}", clone.stdout, checkout.stdout),
            stderr: format!("{}{}", clone.stderr, checkout.stderr),
            duration_ms: clone.duration_ms + checkout.duration_ms,
            ..checkout
        }))
    }
}

/// Provision an interpreter from the local machine.
///
/// Looks for `python<version>` on `PATH`, then for `python3`/`python` reporting
/// that version, links it into the job `bin/` directory and prepends that
/// directory to `PATH` for the rest of the job.
pub struct SetupPython;

impl ActionHandler for SetupPython {
    fn run(&self, ctx: &StepContext, with: &BTreeMap<String, String>) -> Result<StepOutcome> {
        let version = with
            .get("python-version")
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::validation_missing_argument(vec!["python-version".to_string()]))?;

        let search_path = ctx
            .env
            .get("PATH")
            .map(OsString::from)
            .or_else(|| std::env::var_os("PATH"))
            .unwrap_or_default();

        let Some((interpreter, reported)) = find_interpreter(version, &search_path) else {
            return Ok(StepOutcome::failed(format!(
                "Python {} was not found on PATH",
                version
            )));
        };

        let bin = &ctx.workspace.bin;
        for name in ["python", "python3"] {
            link(&interpreter, &bin.join(name))?;
        }

        let mut dirs = vec![bin.clone()];
        dirs.extend(std::env::split_paths(&search_path));
        let path = std::env::join_paths(dirs)
            .map_err(|e| Error::internal_unexpected(format!("Cannot build PATH: {}", e)))?;

        log_status!("setup-python", "{}: Python {} ({})", ctx.job_id, reported, interpreter.display());

        let output = CommandOutput {
            stdout: format!("Python {} at {}\n", reported, interpreter.display()),
            success: true,
            ..Default::default()
        };
        Ok(StepOutcome::from_output(output)
            .with_export("PATH", path.to_string_lossy())
            .with_export("pythonLocation", interpreter.display().to_string()))
    }
}

fn find_interpreter(version: &str, search_path: &OsString) -> Option<(PathBuf, String)> {
    let dirs: Vec<PathBuf> = std::env::split_paths(search_path).collect();
    let exact = format!("python{}", version);

    for dir in &dirs {
        let candidate = dir.join(&exact);
        if candidate.is_file() {
            let reported = reported_version(&candidate).unwrap_or_else(|| version.to_string());
            return Some((candidate, reported));
        }
    }

    for name in ["python3", "python"] {
        for dir in &dirs {
            let candidate = dir.join(name);
            if !candidate.is_file() {
                continue;
            }
            if let Some(reported) = reported_version(&candidate) {
                if version_matches(&reported, version) {
                    return Some((candidate, reported));
                }
            }
        }
    }

    None
}

/// `Python 3.11.4` -> `3.11.4`. Older interpreters print to stderr.
fn reported_version(interpreter: &Path) -> Option<String> {
    let out = command::run_program(
        &interpreter.display().to_string(),
        &["--version".to_string()],
        None,
        &[],
    );
    if !out.success {
        return None;
    }
    let text = if out.stdout.trim().is_empty() {
        out.stderr
    } else {
        out.stdout
    };
    text.trim()
        .strip_prefix("Python ")
        .map(|v| v.trim().to_string())
}

/// `3.11.4` satisfies `3.11` and `3.11.4`, never `3.1`.
fn version_matches(reported: &str, wanted: &str) -> bool {
    reported == wanted || reported.starts_with(&format!("{}.", wanted))
}

fn link(target: &Path, at: &Path) -> Result<()> {
    if at.symlink_metadata().is_ok() {
        std::fs::remove_file(at)
            .map_err(|e| Error::internal_io(e.to_string(), Some(format!("remove {}", at.display()))))?;
    }

    #[cfg(unix)]
    let linked = std::os::unix::fs::symlink(target, at);
    #[cfg(not(unix))]
    let linked = std::fs::copy(target, at).map(|_| ());

    linked.map_err(|e| Error::internal_io(e.to_string(), Some(format!("link {}", at.display()))))
}
