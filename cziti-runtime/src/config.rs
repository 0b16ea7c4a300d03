//! Runtime configuration, loaded from a JSON file.
//!
//! Every field is optional in the file; absent fields take the defaults from
//! [`crate::paths`].

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use cziti_core::LogLevel;

use crate::error::{io_err, SessionError};
use crate::paths::{
    default_log_dir, LogPaths, DEFAULT_REFRESH_INTERVAL, DEFAULT_RETENTION,
    EVENT_CHANNEL_CAPACITY,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    pub log_level: LogLevel,
    pub refresh_interval_secs: u64,
    pub event_capacity: usize,
    pub retention_days: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            log_dir: None,
            log_level: LogLevel::default(),
            refresh_interval_secs: DEFAULT_REFRESH_INTERVAL.as_secs(),
            event_capacity: EVENT_CHANNEL_CAPACITY,
            retention_days: DEFAULT_RETENTION.as_secs() / (24 * 60 * 60),
        }
    }
}

impl RuntimeConfig {
    pub fn load(path: &Path) -> Result<Self, SessionError> {
        let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }

    /// Resolve the log directory, falling back to the platform default.
    pub fn log_paths(&self) -> Result<LogPaths, SessionError> {
        self.log_dir
            .clone()
            .or_else(default_log_dir)
            .map(LogPaths::new)
            .ok_or(SessionError::LogDirNotFound)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
