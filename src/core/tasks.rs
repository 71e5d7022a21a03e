//! Named task collection with pre-task dependencies.
//!
//! A task runs its own commands after every task it `needs`. Running `lint`
//! with `needs: [flake8, pylint, mypy]` runs the three linters in that order,
//! then lint's own commands (if any). Each task runs at most once per
//! invocation even when several tasks need it.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;

use serde::{Deserialize, Deserializer, Serialize};

use crate::error::{Error, Result};
use crate::utils::command::{self, CommandOutput};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TaskDefinition {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(
        default,
        deserialize_with = "one_or_many",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub run: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub needs: Vec<String>,
}

fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match Option::<OneOrMany>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(OneOrMany::One(cmd)) => vec![cmd],
        Some(OneOrMany::Many(cmds)) => cmds,
    })
}

/// One command of a task run, as executed.
#[derive(Debug, Clone, Serialize)]
pub struct TaskCommandResult {
    pub task: String,
    pub command: String,
    pub success: bool,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskRunResult {
    pub task: String,
    /// Tasks in execution order, prerequisites first.
    pub order: Vec<String>,
    pub commands: Vec<TaskCommandResult>,
    pub success: bool,
}

impl TaskRunResult {
    pub fn exit_code(&self) -> i32 {
        self.commands
            .iter()
            .find(|c| !c.success)
            .map(|c| if c.exit_code == 0 { 1 } else { c.exit_code })
            .unwrap_or(0)
    }

    /// Concatenated stdout/stderr of every command, in order.
    pub fn combined_output(&self) -> (String, String) {
        let mut stdout = String::new();
        let mut stderr = String::new();
        for cmd in &self.commands {
            stdout.push_str(&cmd.stdout);
            stderr.push_str(&cmd.stderr);
        }
        (stdout, stderr)
    }
}

/// Check the whole task graph: known prerequisites, no empty tasks, no cycles.
pub fn validate(tasks: &BTreeMap<String, TaskDefinition>) -> Result<()> {
    for (name, task) in tasks {
        if name.trim().is_empty() {
            return Err(Error::validation_invalid_argument(
                "tasks",
                "Task names cannot be empty",
                None,
                None,
            ));
        }

        if task.run.is_empty() && task.needs.is_empty() {
            return Err(Error::validation_invalid_argument(
                format!("tasks.{}", name),
                format!("Task '{}' has neither 'run' nor 'needs'", name),
                Some(name.clone()),
                None,
            ));
        }

        for need in &task.needs {
            if !tasks.contains_key(need) {
                return Err(Error::validation_invalid_argument(
                    format!("tasks.{}", name),
                    format!("Task '{}' needs unknown task '{}'", name, need),
                    Some(name.clone()),
                    Some(tasks.keys().cloned().collect()),
                ));
            }
        }
    }

    let mut indegree: HashMap<&str, usize> = tasks
        .iter()
        .map(|(name, task)| (name.as_str(), task.needs.len()))
        .collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for (name, task) in tasks {
        for need in &task.needs {
            dependents.entry(need.as_str()).or_default().push(name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = indegree
        .iter()
        .filter(|(_, count)| **count == 0)
        .map(|(name, _)| *name)
        .collect();

    let mut visited = 0;
    while let Some(name) = queue.pop_front() {
        visited += 1;
        for child in dependents.get(name).into_iter().flatten() {
            if let Some(count) = indegree.get_mut(child) {
                *count -= 1;
                if *count == 0 {
                    queue.push_back(child);
                }
            }
        }
    }

    if visited != tasks.len() {
        let mut pending: Vec<String> = indegree
            .into_iter()
            .filter(|(_, count)| *count > 0)
            .map(|(name, _)| name.to_string())
            .collect();
        pending.sort();
        return Err(Error::validation_invalid_argument(
            "tasks",
            "Task dependencies contain a cycle",
            None,
            Some(pending),
        ));
    }

    Ok(())
}

/// Execution order for `name`: prerequisites first, in `needs` order, each once.
pub fn order(tasks: &BTreeMap<String, TaskDefinition>, name: &str) -> Result<Vec<String>> {
    fn visit(
        tasks: &BTreeMap<String, TaskDefinition>,
        name: &str,
        visiting: &mut Vec<String>,
        done: &mut HashSet<String>,
        out: &mut Vec<String>,
    ) -> Result<()> {
        if done.contains(name) {
            return Ok(());
        }
        if visiting.iter().any(|v| v == name) {
            let mut chain = visiting.clone();
            chain.push(name.to_string());
            return Err(Error::validation_invalid_argument(
                "tasks",
                format!("Task dependency cycle: {}", chain.join(" -> ")),
                Some(name.to_string()),
                None,
            ));
        }

        let task = tasks
            .get(name)
            .ok_or_else(|| Error::task_not_found(name, tasks.keys().cloned().collect()))?;

        visiting.push(name.to_string());
        for need in &task.needs {
            visit(tasks, need, visiting, done, out)?;
        }
        visiting.pop();

        done.insert(name.to_string());
        out.push(name.to_string());
        Ok(())
    }

    let mut out = Vec::new();
    visit(tasks, name, &mut Vec::new(), &mut HashSet::new(), &mut out)?;
    Ok(out)
}

/// Run a task and its prerequisites in `dir`, stopping at the first failing command.
pub fn run(
    tasks: &BTreeMap<String, TaskDefinition>,
    name: &str,
    dir: Option<&Path>,
    env: &[(String, String)],
) -> Result<TaskRunResult> {
    let order = order(tasks, name)?;
    let mut commands = Vec::new();
    let mut success = true;

    'tasks: for task_name in &order {
        let Some(task) = tasks.get(task_name) else {
            continue;
        };

        for cmd in &task.run {
            log_status!("task", "{}: {}", task_name, cmd);
            let output: CommandOutput = command::run_shell(cmd, dir, env);
            let ok = output.success;

            commands.push(TaskCommandResult {
                task: task_name.clone(),
                command: cmd.clone(),
                success: output.success,
                exit_code: output.exit_code,
                stdout: output.stdout,
                stderr: output.stderr,
                duration_ms: output.duration_ms,
            });

            if !ok {
                success = false;
                break 'tasks;
            }
        }
    }

    Ok(TaskRunResult {
        task: name.to_string(),
        order,
        commands,
        success,
    })
}
