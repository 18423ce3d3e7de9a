//! Pinned database path helper.
//!
//! The database lives at exactly one location under the configured data
//! directory. Everything that needs the path derives it from here so that
//! two components can never end up writing to divergent files.

use std::path::{Path, PathBuf};

/// File name of the single Logly database.
pub const DB_FILE_NAME: &str = "logly.db";

/// Directory name for daily-rotated daemon logs, sibling to the database.
pub const LOGS_DIR_NAME: &str = "logs";

/// The one database path for a given data directory.
#[must_use]
pub fn db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(DB_FILE_NAME)
}

/// Directory the daily-rotating daemon log is written to.
#[must_use]
pub fn logs_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(LOGS_DIR_NAME)
}

/// Whether `path` is a pinned database location, i.e. one that
/// [`db_path`] could have produced for some data directory.
#[must_use]
pub fn is_pinned_db_path(path: &Path) -> bool {
    path.file_name().is_some_and(|name| name == DB_FILE_NAME)
}
