//! Where the config file lives, and writing the documented default.

use coedit_common::ConfigError;
use std::path::{Path, PathBuf};
use tracing::info;

use super::template::default_config_toml;

/// Overrides the platform path when set and non-empty.
pub const CONFIG_PATH_ENV: &str = "COEDIT_CONFIG";

/// `$COEDIT_CONFIG`, else `<config dir>/coedit/config.toml`.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|dir| dir.join("coedit").join("config.toml"))
        .ok_or_else(|| ConfigError::ParseError("no platform config directory".into()))
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> ConfigError {
    ConfigError::ParseError(format!("failed to {action} {}: {e}", path.display()))
}

/// Write the documented default config to `path`, creating parent
/// directories. The file appears complete or not at all.
pub fn create_default_config(path: &Path) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
    }

    let staging = path.with_extension("toml.tmp");
    std::fs::write(&staging, default_config_toml()).map_err(|e| io_error("write", &staging, e))?;
    std::fs::rename(&staging, path).map_err(|e| io_error("install", path, e))?;

    info!(path = %path.display(), "Wrote default config");
    Ok(())
}
