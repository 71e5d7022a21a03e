use clap::Args;
use serde::Serialize;

use sonitas_ci::defaults;
use sonitas_ci::io;
use sonitas_ci::log_status;
use sonitas_ci::workflow;

use super::{CmdResult, GlobalArgs};

#[derive(Args)]
pub struct InitArgs {
    /// Overwrite an existing workflow file
    #[arg(long)]
    pub force: bool,
}

#[derive(Debug, Serialize)]
pub struct InitOutput {
    pub command: &'static str,
    pub path: String,
    pub overwritten: bool,
    pub next_steps: Vec<String>,
}

/// Write the built-in workflow into the repository so it can be edited.
pub fn run(args: InitArgs, global: &GlobalArgs) -> CmdResult<InitOutput> {
    let defaults = defaults::load_defaults();
    let path = global.repo.join(&defaults.workflow_file);
    let existed = path.exists();

    if existed && !args.force {
        return Err(sonitas_ci::Error::validation_invalid_argument(
            "workflow",
            format!("{} already exists", path.display()),
            Some(path.display().to_string()),
            None,
        )
        .with_hint("Pass --force to overwrite it with the built-in workflow"));
    }

    io::write_file_atomic(&path, workflow::DEFAULT_WORKFLOW, "write workflow")?;
    log_status!("init", "Wrote {}", path.display());

    Ok((
        InitOutput {
            command: "init",
            path: path.display().to_string(),
            overwritten: existed,
            next_steps: vec![
                "sonitas-ci validate".to_string(),
                "sonitas-ci plan".to_string(),
                "sonitas-ci run".to_string(),
            ],
        },
        0,
    ))
}
