//! The shared JSON-lines notification log.
//!
//! The listener process is the only writer; it appends one compact JSON
//! object per line while holding an exclusive `flock` on a sibling lock file
//! and flushes before releasing it. Readers never lock. They treat a line as
//! complete only once its terminating newline is present, so a write caught
//! half-way is simply not seen yet.

mod reader;

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use nix::fcntl::{Flock, FlockArg};
use serde_json::Value;
use thiserror::Error;
use tracing::warn;

use fctt_config::lock_path_for;
use fctt_messages::Notification;

pub use reader::get_notifications;

const LOG_TARGET: &str = concat!(env!("CARGO_PKG_NAME"), "::notifications");

/// Errors raised while writing or reading the notification log.
#[derive(Debug, Error)]
pub enum NotificationLogError {
    /// A filesystem operation on the log failed.
    #[error("failed to {operation} '{path}': {source}")]
    Io {
        /// Operation being attempted.
        operation: &'static str,
        /// Affected file.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: io::Error,
    },
    /// The cross-process lock could not be taken.
    #[error("failed to lock '{path}': {source}")]
    Lock {
        /// Lock file.
        path: Utf8PathBuf,
        /// Underlying failure.
        #[source]
        source: nix::Error,
    },
    /// The record could not be serialised.
    #[error("failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),
    /// The log did not appear or did not change in time.
    #[error("notification log '{path}' unchanged after {timeout:?}")]
    Timeout {
        /// Log file.
        path: Utf8PathBuf,
        /// Bound that elapsed.
        timeout: Duration,
    },
}

/// Handle on one notification log and its lock file.
///
/// Both the listener and the test-side reader build one from the same path;
/// there is no process-wide log state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationLog {
    path: Utf8PathBuf,
    lock_path: Utf8PathBuf,
}

impl NotificationLog {
    /// Describes the log at `path`, locked through `<path>.lock`.
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let log = path.into();
        Self {
            lock_path: lock_path_for(&log),
            path: log,
        }
    }

    /// Log file path.
    #[must_use]
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// Lock file path.
    #[must_use]
    pub fn lock_path(&self) -> &Utf8Path {
        &self.lock_path
    }

    /// Returns `true` once the log file exists.
    #[must_use]
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Removes any stale log and creates a fresh, empty one.
    pub fn recreate(&self) -> Result<(), NotificationLogError> {
        remove_if_present(&self.path).map_err(|source| io_error("remove", &self.path, source))?;
        let _lock = self.lock()?;
        File::create(&self.path).map_err(|source| io_error("create", &self.path, source))?;
        Ok(())
    }

    /// Appends `record` as one line under the cross-process lock.
    pub fn append(&self, record: &Value) -> Result<(), NotificationLogError> {
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');
        let _lock = self.lock()?;
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .map_err(|source| io_error("open", &self.path, source))?;
        file.write_all(&line)
            .and_then(|()| file.flush())
            .map_err(|source| io_error("append to", &self.path, source))
    }

    /// Reads every complete line, in order.
    ///
    /// A trailing line without its newline is ignored; lines that are not
    /// notifications are logged and skipped.
    pub fn read(&self) -> Result<Vec<Notification>, NotificationLogError> {
        let contents =
            fs::read_to_string(&self.path).map_err(|source| io_error("read", &self.path, source))?;
        Ok(parse_complete_lines(&contents))
    }

    /// Deletes the log and its lock file, ignoring absent files.
    pub fn remove(&self) {
        for path in [&self.path, &self.lock_path] {
            if let Err(error) = remove_if_present(path) {
                warn!(target: LOG_TARGET, %path, %error, "failed to remove notification file");
            }
        }
    }

    fn lock(&self) -> Result<Flock<File>, NotificationLogError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock_path)
            .map_err(|source| io_error("open", &self.lock_path, source))?;
        Flock::lock(file, FlockArg::LockExclusive).map_err(|(_, source)| {
            NotificationLogError::Lock {
                path: self.lock_path.clone(),
                source,
            }
        })
    }
}

fn io_error(operation: &'static str, path: &Utf8Path, source: io::Error) -> NotificationLogError {
    NotificationLogError::Io {
        operation,
        path: path.to_owned(),
        source,
    }
}

fn parse_complete_lines(contents: &str) -> Vec<Notification> {
    let complete = match contents.rfind('\n') {
        Some(end) => contents.get(..end).unwrap_or_default(),
        None => "",
    };
    complete
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str(line) {
            Ok(notification) => Some(notification),
            Err(error) => {
                warn!(target: LOG_TARGET, %error, line, "skipping malformed log line");
                None
            }
        })
        .collect()
}

fn remove_if_present(path: &Utf8Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error),
        _ => Ok(()),
    }
}
