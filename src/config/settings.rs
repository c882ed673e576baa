use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bridge::{AttributionPolicy, DEFAULT_MESSAGE, DEFAULT_PATTERNS};
use crate::error::{BridgeError, BridgeResult};

/// Everything the bridge needs to spawn and supervise the worker.
///
/// Every field has a default, so an empty TOML file is a valid configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct BridgeSettings {
    pub worker: WorkerSettings,
    pub timeouts: TimeoutSettings,
    pub classifier: ClassifierSettings,
}

/// How the worker process is started.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub program: String,
    pub args: Vec<String>,
    /// Directory the script argument (the first argument) is resolved in.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub script_dir: Option<PathBuf>,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            program: "python3".to_string(),
            args: vec!["ig_fetcher.py".to_string()],
            script_dir: None,
        }
    }
}

impl WorkerSettings {
    /// Arguments passed to the worker, with the script resolved against
    /// `script_dir` when it is a relative path.
    pub fn resolved_args(&self) -> Vec<String> {
        let mut args = self.args.clone();
        if let (Some(dir), Some(script)) = (&self.script_dir, args.first_mut()) {
            let path = PathBuf::from(script.as_str());
            if path.is_relative() {
                *script = dir.join(path).to_string_lossy().into_owned();
            }
        }
        args
    }
}

/// Timer settings, in whole seconds.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutSettings {
    /// How often the sweeper looks for stale batch streams.
    pub sweep_interval_secs: u64,
    /// Age after which an incomplete batch stream is failed.
    pub batch_deadline_secs: u64,
    /// How long hosts wait for the worker's ready status.
    pub ready_timeout_secs: u64,
}

impl Default for TimeoutSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: 60,
            batch_deadline_secs: 300,
            ready_timeout_secs: 10,
        }
    }
}

impl TimeoutSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn batch_deadline(&self) -> Duration {
        Duration::from_secs(self.batch_deadline_secs)
    }

    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }
}

/// Error-stream classification settings.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ClassifierSettings {
    pub policy: AttributionPolicy,
    /// Substrings that mark a not-found failure, matched case-insensitively.
    pub patterns: Vec<String>,
    /// Message delivered to the attributed request.
    pub message: String,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        Self {
            policy: AttributionPolicy::default(),
            patterns: DEFAULT_PATTERNS.iter().map(|p| p.to_string()).collect(),
            message: DEFAULT_MESSAGE.to_string(),
        }
    }
}

impl BridgeSettings {
    /// Reject settings the bridge cannot run with.
    pub fn validate(&self) -> BridgeResult<()> {
        if self.worker.program.trim().is_empty() {
            return Err(BridgeError::config("worker.program must not be empty"));
        }
        if self.timeouts.sweep_interval_secs == 0 {
            return Err(BridgeError::config(
                "timeouts.sweep_interval_secs must be at least 1",
            ));
        }
        if self.timeouts.batch_deadline_secs == 0 {
            return Err(BridgeError::config(
                "timeouts.batch_deadline_secs must be at least 1",
            ));
        }
        Ok(())
    }
}
