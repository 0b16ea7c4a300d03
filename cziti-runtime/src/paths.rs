use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone};

pub const CANONICAL_LOG: &str = "cziti.log";
pub const ROTATED_PREFIX: &str = "cziti-";
pub const ROTATED_SUFFIX: &str = ".log";
pub const ROTATED_TIMESTAMP_FORMAT: &str = "%Y-%m-%d-%H%M%S";

pub const DEFAULT_RETENTION: Duration = Duration::from_secs(7 * 24 * 60 * 60);
pub const DEFAULT_REFRESH_INTERVAL: Duration = Duration::from_secs(15);
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// `<data_local_dir>/cziti/logs`, if the platform has such a directory.
pub fn default_log_dir() -> Option<PathBuf> {
    dirs::data_local_dir().map(|dir| dir.join("cziti").join("logs"))
}

/// Locations of the engine log files under one directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    dir: PathBuf,
}

impl LogPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The active log file, `cziti.log`.
    pub fn canonical(&self) -> PathBuf {
        self.dir.join(CANONICAL_LOG)
    }

    /// `cziti-<YYYY-MM-DD-HHMMSS>.log` for the given rotation time.
    pub fn rotated<Tz>(&self, at: &DateTime<Tz>) -> PathBuf
    where
        Tz: TimeZone,
        Tz::Offset: std::fmt::Display,
    {
        self.dir.join(format!(
            "{ROTATED_PREFIX}{}{ROTATED_SUFFIX}",
            at.format(ROTATED_TIMESTAMP_FORMAT)
        ))
    }
}

/// True for file names produced by [`LogPaths::rotated`] (prefix match only).
pub fn is_rotated_log_name(name: &str) -> bool {
    name.starts_with(ROTATED_PREFIX)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
