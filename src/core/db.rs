use crate::core::error;
use crate::core::schemas;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub fn db_connect(db_path: &str, busy_timeout_secs: u32) -> Result<Connection, error::TissueError> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(u64::from(busy_timeout_secs)))
        .map_err(error::TissueError::RusqliteError)?;
    conn.query_row("PRAGMA journal_mode=WAL;", [], |_| Ok(()))
        .map_err(error::TissueError::RusqliteError)?;
    conn.execute("PRAGMA foreign_keys=ON;", [])
        .map_err(error::TissueError::RusqliteError)?;
    Ok(conn)
}

/// Surface a stored text column that no longer decodes as a read error.
pub fn corrupt_column<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, err.into())
}

pub fn tissue_db_path(data_dir: &Path) -> PathBuf {
    data_dir.join(schemas::TISSUE_DB_NAME)
}

pub fn ensure_data_dir(data_dir: &Path) -> Result<(), error::TissueError> {
    fs::create_dir_all(data_dir).map_err(error::TissueError::IoError)
}

/// Creates every table and index if missing and stamps the schema version.
/// Safe to call on every open.
pub fn ensure_schema(conn: &Connection) -> Result<(), error::TissueError> {
    conn.execute(schemas::TISSUE_DB_SCHEMA_META, [])?;

    let current: Option<String> = conn
        .query_row(
            "SELECT value FROM meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()
        .map_err(error::TissueError::RusqliteError)?;

    let current_version: u32 = current
        .as_deref()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(0);

    if current_version >= schemas::TISSUE_SCHEMA_VERSION {
        return Ok(());
    }

    conn.execute(schemas::TISSUE_DB_SCHEMA_ISSUES, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_INDEX_ISSUES_STATUS, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_TAGS, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_INDEX_TAGS_TAG, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_DEPS, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_INDEX_DEPS_SRC_ACTIVE, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_INDEX_DEPS_DST_ACTIVE, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_COMMENTS, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_INDEX_COMMENTS_ISSUE, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_EVENTS, [])?;
    conn.execute(schemas::TISSUE_DB_SCHEMA_INDEX_EVENTS_ISSUE, [])?;

    conn.execute(
        "INSERT INTO meta(key, value) VALUES('schema_version', ?1)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
        [schemas::TISSUE_SCHEMA_VERSION.to_string()],
    )?;

    Ok(())
}
