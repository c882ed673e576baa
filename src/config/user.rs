//! User configuration loading for followee-bridge.
//!
//! User config location: $XDG_CONFIG_HOME/followee-bridge/followee-bridge.toml
//! Fallback: the platform config directory reported by `dirs`.

use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use super::settings::BridgeSettings;

const APP_DIR: &str = "followee-bridge";
const CONFIG_FILE: &str = "followee-bridge.toml";

/// Errors that can occur when loading a configuration file.
#[derive(Debug, Error)]
pub enum UserConfigError {
    /// Failed to read the config file (other than not-found)
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Failed to parse the config file as TOML
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type UserConfigResult<T> = Result<T, UserConfigError>;

/// Returns the path to the user configuration file.
///
/// 1. If $XDG_CONFIG_HOME is set: $XDG_CONFIG_HOME/followee-bridge/followee-bridge.toml
/// 2. Otherwise: `dirs::config_dir()`/followee-bridge/followee-bridge.toml
///
/// Returns None if neither location can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    let base = match std::env::var_os("XDG_CONFIG_HOME") {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg),
        _ => dirs::config_dir()?,
    };
    Some(base.join(APP_DIR).join(CONFIG_FILE))
}

/// Load the user configuration file, if one exists.
///
/// A missing file is `Ok(None)`; a file that exists but cannot be read or
/// parsed is an error.
pub fn load_user_config() -> UserConfigResult<Option<BridgeSettings>> {
    let Some(path) = user_config_path() else {
        return Ok(None);
    };

    match std::fs::read_to_string(&path) {
        Ok(contents) => parse(&path, &contents).map(Some),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(UserConfigError::Read { path, source }),
    }
}

/// Load settings from an explicit path. The file must exist.
pub fn load_config_file(path: &Path) -> UserConfigResult<BridgeSettings> {
    let contents = std::fs::read_to_string(path).map_err(|source| UserConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    parse(path, &contents)
}

fn parse(path: &Path, contents: &str) -> UserConfigResult<BridgeSettings> {
    let settings = toml::from_str(contents).map_err(|source| UserConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    log::debug!(
        target: "followee_bridge::config",
        "Loaded configuration from {}",
        path.display()
    );
    Ok(settings)
}
