//! Daily rotation of the engine log.
//!
//! A named thread sleeps until the next local midnight and then schedules a
//! rotation onto the loop thread. The rotation itself runs on the loop,
//! since the engine owns the log sink:
//!   close sink → `cziti.log` → `cziti-<YYYY-MM-DD-HHMMSS>.log` →
//!   reopen `cziti.log` → rebind sink → delete expired rotated files.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use chrono::{DateTime, Local, TimeZone};

use cziti_core::LogLevel;

use crate::bridge::{EventLoop, LoopHandle};
use crate::engine::Engine;
use crate::error::{io_err, SessionError};
use crate::paths::{is_rotated_log_name, LogPaths};

const SCHEDULER_THREAD: &str = "cziti-log-roll";

/// Used when local midnight does not exist (DST gap) or has just passed.
const FALLBACK_DELAY: Duration = Duration::from_secs(60 * 60);

/// Outcome of one [`rotate`] call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RotationReport {
    /// Where the previous `cziti.log` went, if there was one.
    pub rotated_to: Option<PathBuf>,
    /// Whether the engine has a fresh log sink.
    pub reopened: bool,
    /// Rotated files deleted by retention.
    pub removed: Vec<PathBuf>,
}

/// Open `path` for the engine: created if missing, emptied, append mode.
pub fn open_log_file(path: &Path) -> Result<File, SessionError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| io_err(path, e))?;
    // `append` and `truncate` cannot be combined in one open.
    file.set_len(0).map_err(|e| io_err(path, e))?;
    Ok(file)
}

/// Rotate the engine log. Must run on the loop thread.
pub fn rotate<Tz>(
    engine: &mut dyn Engine,
    paths: &LogPaths,
    now: DateTime<Tz>,
    retention: Duration,
) -> RotationReport
where
    Tz: TimeZone,
    Tz::Offset: std::fmt::Display,
{
    let mut report = RotationReport::default();
    engine.set_log_sink(None);

    let canonical = paths.canonical();
    let target = paths.rotated(&now);
    match fs::rename(&canonical, &target) {
        Ok(()) => {
            tracing::info!(to = %target.display(), "engine log rotated");
            report.rotated_to = Some(target);
        }
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %canonical.display(), "no engine log to rotate");
        }
        Err(err) => {
            tracing::warn!(
                path = %canonical.display(),
                error = %err,
                "could not rename engine log; it will be truncated",
            );
        }
    }

    match open_log_file(&canonical) {
        Ok(file) => {
            engine.set_log_sink(Some(file));
            report.reopened = true;
        }
        Err(err) => tracing::warn!(error = %err, "could not reopen engine log"),
    }

    report.removed = remove_expired_logs(paths.dir(), now.into(), retention);
    report
}

/// Delete rotated logs in `dir` last modified more than `retention` before
/// `as_of`. Only regular files with the rotated prefix are considered.
pub fn remove_expired_logs(dir: &Path, as_of: SystemTime, retention: Duration) -> Vec<PathBuf> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(dir = %dir.display(), error = %err, "cannot scan log directory");
            return Vec::new();
        }
    };

    let mut removed = Vec::new();
    for entry in entries.flatten() {
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_file || !is_rotated_log_name(name) {
            continue;
        }

        let modified = match entry.metadata().and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(err) => {
                tracing::debug!(file = name, error = %err, "no mtime for rotated log");
                continue;
            }
        };
        if !is_older_than_retention(as_of, modified, retention) {
            continue;
        }

        let path = entry.path();
        match fs::remove_file(&path) {
            Ok(()) => {
                tracing::info!(file = name, "removed expired engine log");
                removed.push(path);
            }
            Err(err) => tracing::warn!(file = name, error = %err, "could not remove expired log"),
        }
    }
    removed
}

/// Strictly older than the window. Files stamped in the future never expire.
pub fn is_older_than_retention(as_of: SystemTime, modified: SystemTime, retention: Duration) -> bool {
    as_of
        .duration_since(modified)
        .map(|age| age > retention)
        .unwrap_or(false)
}

/// Time from `now` to the start of the next calendar day in `now`'s zone.
pub fn duration_until_next_midnight<Tz: TimeZone>(now: &DateTime<Tz>) -> Duration {
    let midnight = now
        .date_naive()
        .succ_opt()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .and_then(|local| now.timezone().from_local_datetime(&local).earliest());

    match midnight {
        Some(midnight) => midnight
            .signed_duration_since(now.clone())
            .to_std()
            .unwrap_or(FALLBACK_DELAY),
        None => FALLBACK_DELAY,
    }
}

/// Queue one rotation onto the loop thread.
pub fn schedule_rotation(
    handle: &LoopHandle,
    paths: LogPaths,
    retention: Duration,
) -> Result<(), SessionError> {
    handle.enqueue_on_loop(move |engine| {
        let report = rotate(engine, &paths, Local::now(), retention);
        tracing::debug!(
            reopened = report.reopened,
            removed = report.removed.len(),
            "log rotation finished",
        );
    })
}

/// The midnight timer thread. Stops on [`RotationScheduler::stop`], on drop,
/// or once the loop has exited.
#[derive(Debug)]
pub struct RotationScheduler {
    stop_tx: Option<mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl RotationScheduler {
    /// Rotate at every local midnight.
    pub fn spawn(
        handle: LoopHandle,
        paths: LogPaths,
        retention: Duration,
    ) -> Result<Self, SessionError> {
        Self::spawn_with(handle, paths, retention, || {
            duration_until_next_midnight(&Local::now())
        })
    }

    /// Rotate after each delay returned by `next_delay`.
    pub fn spawn_with<F>(
        handle: LoopHandle,
        paths: LogPaths,
        retention: Duration,
        mut next_delay: F,
    ) -> Result<Self, SessionError>
    where
        F: FnMut() -> Duration + Send + 'static,
    {
        let (stop_tx, stop_rx) = mpsc::channel::<()>();
        let dir = paths.dir().to_path_buf();

        let thread = thread::Builder::new()
            .name(SCHEDULER_THREAD.into())
            .spawn(move || loop {
                let delay = next_delay();
                tracing::debug!(delay_secs = delay.as_secs(), "next log rotation armed");
                match stop_rx.recv_timeout(delay) {
                    Err(RecvTimeoutError::Timeout) => {
                        if let Err(err) = schedule_rotation(&handle, paths.clone(), retention) {
                            tracing::debug!(error = %err, "log rotation timer stopping");
                            break;
                        }
                    }
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            })
            .map_err(|e| io_err(dir, e))?;

        Ok(Self {
            stop_tx: Some(stop_tx),
            thread: Some(thread),
        })
    }

    /// Cancel the timer and wait for its thread. A rotation already queued on
    /// the loop still runs.
    pub fn stop(&mut self) {
        if let Some(tx) = self.stop_tx.take() {
            let _ = tx.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::warn!("log rotation thread panicked");
            }
        }
    }
}

impl Drop for RotationScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Set the engine's log level, bind a fresh `cziti.log` and arm the midnight
/// rotation. Call before the loop starts.
///
/// Failing to open the log file only costs the engine's debug output; the
/// error is logged and startup continues.
pub fn initialize_logging(
    event_loop: &mut EventLoop,
    level: LogLevel,
    paths: LogPaths,
    retention: Duration,
) -> Result<RotationScheduler, SessionError> {
    let engine = event_loop.engine_mut();
    engine.set_log_level(level);
    tracing::info!(level = %level, dir = %paths.dir().display(), "engine logging configured");

    match open_log_file(&paths.canonical()) {
        Ok(file) => engine.set_log_sink(Some(file)),
        Err(err) => tracing::warn!(error = %err, "engine debug log unavailable"),
    }

    RotationScheduler::spawn(event_loop.handle(), paths, retention)
}

// ─── Tests ────────────────────────────────────────────────────────────────────
