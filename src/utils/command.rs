//! Process execution primitives with captured output.

use std::path::Path;
use std::process::{Command, Output};
use std::time::Instant;

use serde::Serialize;

use crate::error::{Error, Result};

/// Captured result of one process invocation.
#[derive(Debug, Clone, Default, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    /// Output for a process that could not be spawned at all.
    pub fn spawn_failed(err: impl std::fmt::Display) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Command error: {}", err),
            success: false,
            exit_code: -1,
            duration_ms: 0,
        }
    }

    fn from_output(out: Output, started: Instant) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
            duration_ms: started.elapsed().as_millis() as u64,
        }
    }
}

/// Run `command` through the platform shell.
///
/// The child inherits the current process environment with `env` applied on top.
pub fn run_shell(command: &str, current_dir: Option<&Path>, env: &[(String, String)]) -> CommandOutput {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let started = Instant::now();
    match cmd.output() {
        Ok(out) => CommandOutput::from_output(out, started),
        Err(e) => CommandOutput::spawn_failed(e),
    }
}

/// Run a program directly (no shell).
pub fn run_program(
    program: &str,
    args: &[String],
    current_dir: Option<&Path>,
    env: &[(String, String)],
) -> CommandOutput {
    let mut cmd = Command::new(program);
    cmd.args(args);

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }
    cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

    let started = Instant::now();
    match cmd.output() {
        Ok(out) => CommandOutput::from_output(out, started),
        Err(e) => CommandOutput::spawn_failed(e),
    }
}

/// Run a command in a directory and return trimmed stdout on success.
pub fn run_in(dir: &Path, program: &str, args: &[&str], context: &str) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .current_dir(dir)
        .output()
        .map_err(|e| {
            Error::internal_io(
                format!("Failed to run {}: {}", context, e),
                Some(context.to_string()),
            )
        })?;

    if !output.status.success() {
        return Err(Error::internal_io(
            format!("{} failed: {}", context, error_text(&output)),
            Some(context.to_string()),
        ));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Extract error text from raw process output, preferring stderr.
pub fn error_text(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.trim().is_empty() {
        stderr.trim().to_string()
    } else {
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }
}
