use crate::error::{Error, Result};
use std::env;
use std::path::PathBuf;

/// Environment override for the config directory.
pub const CONFIG_DIR_ENV: &str = "SONITAS_CI_CONFIG_DIR";

/// Base config directory (~/.config/sonitas-ci/ on unix-like systems)
pub fn sonitas_ci() -> Result<PathBuf> {
    if let Ok(dir) = env::var(CONFIG_DIR_ENV) {
        if !dir.trim().is_empty() {
            return Ok(PathBuf::from(shellexpand::tilde(&dir).to_string()));
        }
    }

    #[cfg(windows)]
    {
        let appdata = env::var("APPDATA").map_err(|_| {
            Error::internal_unexpected(
                "APPDATA environment variable not set on Windows".to_string(),
            )
        })?;
        Ok(PathBuf::from(appdata).join("sonitas-ci"))
    }

    #[cfg(not(windows))]
    {
        let home = env::var("HOME").map_err(|_| {
            Error::internal_unexpected(
                "HOME environment variable not set on Unix-like system".to_string(),
            )
        })?;
        Ok(PathBuf::from(home).join(".config").join("sonitas-ci"))
    }
}

/// Runner config file path
pub fn config_json() -> Result<PathBuf> {
    Ok(sonitas_ci()?.join("sonitas-ci.json"))
}

/// Default root for run workspaces
pub fn default_work_dir() -> PathBuf {
    env::temp_dir().join("sonitas-ci")
}
