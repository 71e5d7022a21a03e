use clap::{Args, Subcommand};
use serde::Serialize;
use serde_json::Value;

use sonitas_ci::defaults::{self, Defaults, RunnerConfig};

use super::CmdResult;

#[derive(Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    command: ConfigCommand,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Display runner configuration (merged defaults + file)
    Show {
        /// Show only built-in defaults (ignore sonitas-ci.json)
        #[arg(long)]
        builtin: bool,
    },
    /// Set a configuration value at a JSON pointer path
    Set {
        /// JSON pointer path (e.g., /defaults/max_parallel)
        pointer: String,
        /// Value to set (JSON)
        value: String,
    },
    /// Remove a configuration value at a JSON pointer path
    Remove {
        /// JSON pointer path (e.g., /defaults/work_dir)
        pointer: String,
    },
    /// Reset configuration to built-in defaults (deletes sonitas-ci.json)
    Reset,
    /// Show the path to sonitas-ci.json
    Path,
}

#[derive(Debug, Serialize, Default)]
pub struct ConfigOutput {
    command: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    config: Option<RunnerConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    defaults: Option<Defaults>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    exists: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deleted: Option<bool>,
}

impl ConfigOutput {
    fn new(command: &str) -> Self {
        Self {
            command: command.to_string(),
            ..Default::default()
        }
    }
}

pub fn run_json(args: ConfigArgs) -> CmdResult<ConfigOutput> {
    match args.command {
        ConfigCommand::Show { builtin } => show(builtin),
        ConfigCommand::Set { pointer, value } => set(&pointer, &value),
        ConfigCommand::Remove { pointer } => remove(&pointer),
        ConfigCommand::Reset => reset(),
        ConfigCommand::Path => path(),
    }
}

fn show(builtin: bool) -> CmdResult<ConfigOutput> {
    let output = if builtin {
        ConfigOutput {
            defaults: Some(defaults::builtin_defaults()),
            ..ConfigOutput::new("config.show")
        }
    } else {
        ConfigOutput {
            config: Some(defaults::load_config()),
            ..ConfigOutput::new("config.show")
        }
    };
    Ok((output, 0))
}

fn require_pointer(pointer: &str) -> sonitas_ci::Result<()> {
    if !pointer.starts_with('/') {
        return Err(sonitas_ci::Error::validation_invalid_argument(
            "pointer",
            "JSON pointer must start with '/'",
            None,
            None,
        ));
    }
    Ok(())
}

/// Apply `edit` to the config as JSON, then re-read it as a typed config and save.
fn edit_config<F>(edit: F) -> sonitas_ci::Result<RunnerConfig>
where
    F: FnOnce(&mut Value) -> sonitas_ci::Result<()>,
{
    let config = defaults::load_config();
    let mut config_json = serde_json::to_value(&config).map_err(|e| {
        sonitas_ci::Error::internal_unexpected(format!("Failed to serialize config: {}", e))
    })?;

    edit(&mut config_json)?;

    let config: RunnerConfig = serde_json::from_value(config_json).map_err(|e| {
        sonitas_ci::Error::validation_invalid_json(e, Some("deserialize config".to_string()), None)
    })?;

    config.validate()?;
    defaults::save_config(&config)?;
    Ok(config)
}

fn set(pointer: &str, value_str: &str) -> CmdResult<ConfigOutput> {
    require_pointer(pointer)?;

    let value: Value = serde_json::from_str(value_str).map_err(|e| {
        sonitas_ci::Error::validation_invalid_json(
            e,
            Some("parse value".to_string()),
            Some(value_str.chars().take(200).collect::<String>()),
        )
    })?;

    let config = edit_config(|json| defaults::set_json_pointer(json, pointer, value.clone()))?;

    Ok((
        ConfigOutput {
            config: Some(config),
            pointer: Some(pointer.to_string()),
            value: Some(value),
            ..ConfigOutput::new("config.set")
        },
        0,
    ))
}

fn remove(pointer: &str) -> CmdResult<ConfigOutput> {
    require_pointer(pointer)?;

    let config = edit_config(|json| defaults::remove_json_pointer(json, pointer))?;

    Ok((
        ConfigOutput {
            config: Some(config),
            pointer: Some(pointer.to_string()),
            ..ConfigOutput::new("config.remove")
        },
        0,
    ))
}

fn reset() -> CmdResult<ConfigOutput> {
    let deleted = defaults::reset_config()?;

    Ok((
        ConfigOutput {
            defaults: Some(defaults::builtin_defaults()),
            path: Some(defaults::config_path()?),
            deleted: Some(deleted),
            ..ConfigOutput::new("config.reset")
        },
        0,
    ))
}

fn path() -> CmdResult<ConfigOutput> {
    Ok((
        ConfigOutput {
            path: Some(defaults::config_path()?),
            exists: Some(defaults::config_exists()),
            ..ConfigOutput::new("config.path")
        },
        0,
    ))
}
