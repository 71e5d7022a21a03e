use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::paths;

/// Root configuration structure for sonitas-ci.json
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct RunnerConfig {
    #[serde(default)]
    pub defaults: Defaults,
}

/// All configurable defaults that can be overridden via sonitas-ci.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Defaults {
    /// Root directory for per-run job workspaces. `~` is expanded.
    #[serde(default = "default_work_dir")]
    pub work_dir: String,

    /// Upper bound on concurrently running jobs. `None` runs every job at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_parallel: Option<usize>,

    /// Keep job workspaces after the run finishes.
    #[serde(default)]
    pub keep_workspaces: bool,

    /// Workflow file name looked up in the repository root.
    #[serde(default = "default_workflow_file")]
    pub workflow_file: String,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            work_dir: default_work_dir(),
            max_parallel: None,
            keep_workspaces: false,
            workflow_file: default_workflow_file(),
        }
    }
}

impl RunnerConfig {
    /// Reject values serde accepts but the runner cannot use.
    pub fn validate(&self) -> Result<()> {
        if self.defaults.max_parallel == Some(0) {
            return Err(Error::config_invalid_value(
                "defaults.max_parallel",
                Some("0".to_string()),
                "max_parallel must be at least 1",
            ));
        }
        Ok(())
    }
}

impl Defaults {
    pub fn work_dir_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.work_dir).to_string())
    }
}

fn default_work_dir() -> String {
    paths::default_work_dir().to_string_lossy().to_string()
}

fn default_workflow_file() -> String {
    ".sonitas-ci.yml".to_string()
}

// =============================================================================
// Loading functions
// =============================================================================

/// Load defaults, merging file config with built-in defaults.
pub fn load_defaults() -> Defaults {
    load_config().defaults
}

/// Load the full config, falling back to built-in defaults on any error.
pub fn load_config() -> RunnerConfig {
    match load_config_from_file() {
        Ok(config) => config,
        Err(err) => {
            if config_exists() {
                log_status!("config", "Ignoring unreadable config: {}", err.message);
            }
            RunnerConfig::default()
        }
    }
}

fn load_config_from_file() -> Result<RunnerConfig> {
    let path = paths::config_json()?;

    if !path.exists() {
        return Err(Error::config_missing_key(
            "defaults",
            Some(path.display().to_string()),
        ));
    }

    let content = fs::read_to_string(&path).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("read {}", path.display())))
    })?;

    parse_config(&content, &path.display().to_string())
}

fn parse_config(content: &str, path: &str) -> Result<RunnerConfig> {
    let config: RunnerConfig =
        serde_json::from_str(content).map_err(|e| Error::config_invalid_json(path, e))?;
    config.validate()?;
    Ok(config)
}

/// Save config (creates the file and its directory if missing).
pub fn save_config(config: &RunnerConfig) -> Result<()> {
    let path = paths::config_json()?;

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("create {}", parent.display())))
        })?;
    }

    let content = serde_json::to_string_pretty(config).map_err(|e| {
        Error::internal_json(e.to_string(), Some("serialize sonitas-ci.json".to_string()))
    })?;

    fs::write(&path, content).map_err(|e| {
        Error::internal_io(e.to_string(), Some(format!("write {}", path.display())))
    })
}

pub fn config_exists() -> bool {
    paths::config_json().map(|p| p.exists()).unwrap_or(false)
}

/// Delete the config file (reset to defaults). Returns whether a file was removed.
pub fn reset_config() -> Result<bool> {
    let path = paths::config_json()?;

    if path.exists() {
        fs::remove_file(&path).map_err(|e| {
            Error::internal_io(e.to_string(), Some(format!("delete {}", path.display())))
        })?;
        Ok(true)
    } else {
        Ok(false)
    }
}

pub fn config_path() -> Result<String> {
    Ok(paths::config_json()?.display().to_string())
}

pub fn builtin_defaults() -> Defaults {
    Defaults::default()
}

// =============================================================================
// JSON pointer editing
// =============================================================================

fn pointer_segments(pointer: &str) -> Result<Vec<String>> {
    let rest = pointer.strip_prefix('/').ok_or_else(|| {
        Error::validation_invalid_argument(
            "pointer",
            "JSON pointer must start with '/'",
            Some(pointer.to_string()),
            None,
        )
    })?;

    if rest.is_empty() {
        return Err(Error::validation_invalid_argument(
            "pointer",
            "JSON pointer must name a field",
            Some(pointer.to_string()),
            None,
        ));
    }

    Ok(rest
        .split('/')
        .map(|s| s.replace("~1", "/").replace("~0", "~"))
        .collect())
}

/// Set `value` at `pointer`, creating intermediate objects as needed.
pub fn set_json_pointer(root: &mut Value, pointer: &str, value: Value) -> Result<()> {
    let segments = pointer_segments(pointer)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| Error::validation_missing_argument(vec!["pointer".to_string()]))?;

    let mut current = root;
    for segment in parents {
        let obj = current.as_object_mut().ok_or_else(|| {
            Error::validation_invalid_argument(
                "pointer",
                format!("'{}' is not inside an object", segment),
                Some(pointer.to_string()),
                None,
            )
        })?;
        current = obj
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }

    let obj = current.as_object_mut().ok_or_else(|| {
        Error::validation_invalid_argument(
            "pointer",
            format!("Cannot set '{}' on a non-object value", last),
            Some(pointer.to_string()),
            None,
        )
    })?;
    obj.insert(last.clone(), value);
    Ok(())
}

/// Remove the value at `pointer`. Missing paths are an error.
pub fn remove_json_pointer(root: &mut Value, pointer: &str) -> Result<()> {
    let segments = pointer_segments(pointer)?;
    let (last, parents) = segments
        .split_last()
        .ok_or_else(|| Error::validation_missing_argument(vec!["pointer".to_string()]))?;

    let mut current = root;
    for segment in parents {
        current = current.get_mut(segment.as_str()).ok_or_else(|| {
            Error::validation_invalid_argument(
                "pointer",
                format!("Path segment '{}' not found", segment),
                Some(pointer.to_string()),
                None,
            )
        })?;
    }

    current
        .as_object_mut()
        .and_then(|obj| obj.remove(last.as_str()))
        .map(|_| ())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                "pointer",
                format!("Field '{}' not found", last),
                Some(pointer.to_string()),
                None,
            )
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn missing_fields_fall_back_to_builtin_values() {
        let config: RunnerConfig = serde_json::from_str(r#"{"defaults":{"max_parallel":2}}"#).unwrap();
        assert_eq!(config.defaults.max_parallel, Some(2));
        assert_eq!(config.defaults.workflow_file, ".sonitas-ci.yml");
        assert!(!config.defaults.keep_workspaces);
    }

    #[test]
    fn zero_max_parallel_is_rejected_on_load() {
        let err = parse_config(r#"{"defaults":{"max_parallel":0}}"#, "sonitas-ci.json").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");

        let config = parse_config(r#"{"defaults":{"max_parallel":1}}"#, "sonitas-ci.json").unwrap();
        assert_eq!(config.defaults.max_parallel, Some(1));
    }

    #[test]
    fn set_json_pointer_creates_intermediate_objects() {
        let mut root = json!({});
        set_json_pointer(&mut root, "/defaults/max_parallel", json!(3)).unwrap();
        assert_eq!(root, json!({"defaults": {"max_parallel": 3}}));
    }

    #[test]
    fn set_json_pointer_rejects_relative_pointer() {
        let mut root = json!({});
        let err = set_json_pointer(&mut root, "defaults", json!(1)).unwrap_err();
        assert_eq!(err.field(), Some("pointer"));
    }

    #[test]
    fn remove_json_pointer_deletes_leaf() {
        let mut root = json!({"defaults": {"keep_workspaces": true, "work_dir": "/tmp"}});
        remove_json_pointer(&mut root, "/defaults/keep_workspaces").unwrap();
        assert_eq!(root, json!({"defaults": {"work_dir": "/tmp"}}));
    }

    #[test]
    fn remove_json_pointer_reports_missing_field() {
        let mut root = json!({"defaults": {}});
        assert!(remove_json_pointer(&mut root, "/defaults/nope").is_err());
    }
}
