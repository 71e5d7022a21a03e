use std::collections::BTreeMap;

use clap::Args;
use serde::Serialize;

use sonitas_ci::pipeline;
use sonitas_ci::workflow::{self, WorkflowSource};

use super::{CmdResult, GlobalArgs, WorkflowArgs};

#[derive(Args)]
pub struct ValidateArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,
}

#[derive(Debug, Serialize)]
pub struct ValidateOutput {
    pub command: &'static str,
    pub source: WorkflowSource,
    pub valid: bool,
    /// Matrix entries per job key.
    pub jobs: BTreeMap<String, usize>,
    pub tasks: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_task: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

pub fn run(args: ValidateArgs, global: &GlobalArgs) -> CmdResult<ValidateOutput> {
    // Loading already rejects structural problems. Building every instance
    // also renders each expression, so validate fails wherever plan would.
    let (workflow, source) = super::load_workflow(global, &args.workflow)?;
    let mut warnings = workflow::validate(&workflow)?;
    let (instances, id_warnings) = pipeline::instantiate(&workflow)?;
    warnings.extend(id_warnings);

    let mut jobs: BTreeMap<String, usize> = BTreeMap::new();
    for instance in &instances {
        *jobs.entry(instance.job_key.clone()).or_default() += 1;
    }

    Ok((
        ValidateOutput {
            command: "validate",
            source,
            valid: true,
            jobs,
            tasks: workflow.tasks.keys().cloned().collect(),
            default_task: workflow.default_task.clone(),
            warnings,
        },
        0,
    ))
}
