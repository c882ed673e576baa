pub mod settings;
pub mod user;

use std::path::Path;

pub use settings::{BridgeSettings, ClassifierSettings, TimeoutSettings, WorkerSettings};
pub use user::{
    UserConfigError, UserConfigResult, load_config_file, load_user_config, user_config_path,
};

use crate::error::{BridgeError, BridgeResult};

/// Resolve the settings the bridge starts with.
///
/// Load order:
/// 1. `explicit` path, if given (must exist)
/// 2. the user config file, if present
/// 3. built-in defaults
///
/// The result is validated before it is returned.
pub fn load_settings(explicit: Option<&Path>) -> BridgeResult<BridgeSettings> {
    let settings = match explicit {
        Some(path) => load_config_file(path).map_err(|e| BridgeError::config(e.to_string()))?,
        None => load_user_config()
            .map_err(|e| BridgeError::config(e.to_string()))?
            .unwrap_or_default(),
    };

    settings.validate()?;
    Ok(settings)
}
