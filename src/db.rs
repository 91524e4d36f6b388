use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::time::Duration;

use crate::error::{Error, Result};

/// Open (creating if needed) the SQLite file at `path`.
///
/// Any failure to create the parent directory or open the file is a
/// [`Error::StoreUnavailable`].
pub async fn connect(path: &Path) -> Result<SqlitePool> {
    let unavailable = |message: String| Error::StoreUnavailable {
        path: path.to_path_buf(),
        message,
    };

    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent).map_err(|e| unavailable(e.to_string()))?;
    }

    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_secs(5));

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| unavailable(e.to_string()))
}
