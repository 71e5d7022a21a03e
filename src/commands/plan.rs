use clap::Args;
use serde::Serialize;

use sonitas_ci::pipeline::{self, RunPlan};
use sonitas_ci::workflow::WorkflowSource;

use super::{CmdResult, EventArgs, FilterArgs, GlobalArgs, WorkflowArgs};

#[derive(Args)]
pub struct PlanArgs {
    #[command(flatten)]
    pub workflow: WorkflowArgs,

    #[command(flatten)]
    pub event: EventArgs,

    #[command(flatten)]
    pub filters: FilterArgs,
}

#[derive(Debug, Serialize)]
pub struct PlanOutput {
    pub command: &'static str,
    pub source: WorkflowSource,
    pub job_count: usize,
    pub plan: RunPlan,
}

pub fn run(args: PlanArgs, global: &GlobalArgs) -> CmdResult<PlanOutput> {
    let (workflow, source) = super::load_workflow(global, &args.workflow)?;
    let event = super::resolve_event(&global.repo, &args.event)?;
    let plan = pipeline::plan(&workflow, &event, &args.filters.to_filters()?)?;

    Ok((
        PlanOutput {
            command: "plan",
            source,
            job_count: plan.jobs.len(),
            plan,
        },
        0,
    ))
}
