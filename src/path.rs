use std::path::PathBuf;

use thiserror::Error;

/// Directory name under the platform config directory.
const APP_DIR: &str = "auth-pipeline";

/// Overrides the config file location entirely.
pub const CONFIG_PATH_ENV: &str = "AUTH_PIPELINE_CONFIG";

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GetConfigFilePathError {
    #[error("Could not determine config directory")]
    CouldNotDetermineConfigDir,
}

/// Get the path to the config directory for the current platform
///
/// On macOS, this is `~/Library/Application Support/auth-pipeline`
/// On Linux, this is `~/.config/auth-pipeline`
/// On Windows, this is `%APPDATA%\auth-pipeline`
pub fn config_directory() -> Result<PathBuf, GetConfigFilePathError> {
    dirs::config_dir()
        .map(|dir| dir.join(APP_DIR))
        .ok_or(GetConfigFilePathError::CouldNotDetermineConfigDir)
}

/// Get the path to the config file: `$AUTH_PIPELINE_CONFIG` when set,
/// `config.toml` inside [`config_directory`] otherwise.
pub fn config_file() -> Result<PathBuf, GetConfigFilePathError> {
    if let Some(path) = std::env::var_os(CONFIG_PATH_ENV).filter(|p| !p.is_empty()) {
        return Ok(PathBuf::from(path));
    }
    Ok(config_directory()?.join("config.toml"))
}
