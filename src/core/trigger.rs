//! Push events and the workflow `on:` filter they are matched against.

use std::collections::BTreeMap;
use std::path::Path;

use glob_match::glob_match;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::utils::command;

/// Parsed `on:` section. Only push filters influence this runner; other
/// event names are kept so `plan` can show them.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(try_from = "RawTrigger")]
pub struct TriggerSpec {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub push: Option<PushFilter>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub other_events: Vec<String>,
}

impl Default for TriggerSpec {
    /// A workflow without `on:` runs on every push.
    fn default() -> Self {
        Self {
            push: Some(PushFilter::default()),
            other_events: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "kebab-case")]
pub struct PushFilter {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub branches_ignore: Vec<String>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTrigger {
    Name(String),
    Names(Vec<String>),
    Map(BTreeMap<String, serde_yml::Value>),
}

impl TryFrom<RawTrigger> for TriggerSpec {
    type Error = String;

    fn try_from(raw: RawTrigger) -> std::result::Result<Self, Self::Error> {
        let names: Vec<(String, serde_yml::Value)> = match raw {
            RawTrigger::Name(name) => vec![(name, serde_yml::Value::Null)],
            RawTrigger::Names(names) => names
                .into_iter()
                .map(|n| (n, serde_yml::Value::Null))
                .collect(),
            RawTrigger::Map(map) => map.into_iter().collect(),
        };

        let mut spec = TriggerSpec {
            push: None,
            other_events: Vec::new(),
        };

        for (name, value) in names {
            if name == "push" {
                let filter = if value.is_null() {
                    PushFilter::default()
                } else {
                    serde_yml::from_value(value)
                        .map_err(|e| format!("invalid push filter: {}", e))?
                };
                spec.push = Some(filter);
            } else {
                spec.other_events.push(name);
            }
        }

        Ok(spec)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TriggerEvent {
    Push { branch: String, commit: String },
}

impl TriggerEvent {
    pub fn push(branch: impl Into<String>, commit: impl Into<String>) -> Self {
        TriggerEvent::Push {
            branch: branch.into(),
            commit: commit.into(),
        }
    }

    /// Build a push event from the current branch and HEAD of a checkout.
    pub fn from_repo(repo: &Path) -> Result<Self> {
        let branch = git_output(repo, &["rev-parse", "--abbrev-ref", "HEAD"])?;
        let commit = git_output(repo, &["rev-parse", "HEAD"])?;
        Ok(Self::push(branch, commit))
    }

    pub fn branch(&self) -> &str {
        match self {
            TriggerEvent::Push { branch, .. } => branch,
        }
    }

    pub fn commit(&self) -> &str {
        match self {
            TriggerEvent::Push { commit, .. } => commit,
        }
    }

    pub fn git_ref(&self) -> String {
        format!("refs/heads/{}", self.branch())
    }
}

fn git_output(repo: &Path, args: &[&str]) -> Result<String> {
    command::run_in(repo, "git", args, "git").map_err(|e| {
        Error::git_command_failed(
            args.join(" "),
            Some(repo.display().to_string()),
            e.details
                .get("error")
                .and_then(|v| v.as_str())
                .unwrap_or(&e.message)
                .to_string(),
        )
        .with_hint("Pass --branch and --commit when the repository is not a git checkout")
    })
}

/// Whether `event` starts a run of a workflow with trigger `spec`.
///
/// A push filter with no branch lists matches every branch. A branch that
/// matches `branches-ignore` never triggers, even if it also matches `branches`.
pub fn matches(spec: &TriggerSpec, event: &TriggerEvent) -> bool {
    match event {
        TriggerEvent::Push { branch, .. } => {
            let Some(filter) = &spec.push else {
                return false;
            };

            if filter
                .branches_ignore
                .iter()
                .any(|pattern| glob_match(pattern, branch))
            {
                return false;
            }

            filter.branches.is_empty()
                || filter
                    .branches
                    .iter()
                    .any(|pattern| glob_match(pattern, branch))
        }
    }
}
