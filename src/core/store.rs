//! Store handle: the `.tissue/` directory, its database and its config.
//!
//! All engine operations take a `&Store` and reach SQLite exclusively through
//! [`Store::read`] and [`Store::write`], which route through the global
//! connection pool.

use crate::core::config::Config;
use crate::core::db;
use crate::core::error::TissueError;
use crate::core::pool;
use crate::core::schemas;
use rusqlite::Connection;
use std::env;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct Store {
    /// Absolute path to the `.tissue` data directory.
    pub root: PathBuf,
    pub db_path: PathBuf,
    pub config: Config,
}

impl Store {
    /// Open (creating if needed) the store rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Result<Self, TissueError> {
        db::ensure_data_dir(data_dir)?;
        let config = Config::load(&data_dir.join(schemas::TISSUE_CONFIG_NAME))?;
        let store = Store {
            root: data_dir.to_path_buf(),
            db_path: db::tissue_db_path(data_dir),
            config,
        };
        store.write("store.init", db::ensure_schema)?;
        Ok(store)
    }

    /// Resolve the data directory: `TISSUE_DIR`, else the nearest ancestor of
    /// `start` containing `.tissue/`, else `start/.tissue`.
    pub fn discover(start: &Path) -> PathBuf {
        if let Ok(dir) = env::var("TISSUE_DIR") {
            if !dir.trim().is_empty() {
                return PathBuf::from(dir);
            }
        }
        let mut current = Some(start);
        while let Some(path) = current {
            let candidate = path.join(schemas::TISSUE_DIR_NAME);
            if candidate.is_dir() {
                return candidate;
            }
            current = path.parent();
        }
        start.join(schemas::TISSUE_DIR_NAME)
    }

    pub fn write<F, R>(&self, op: &str, f: F) -> Result<R, TissueError>
    where
        F: FnMut(&Connection) -> Result<R, TissueError>,
    {
        tracing::debug!(op, db = %self.db_path.display(), "write");
        pool::global_pool().with_write(&self.db_path, self.config.conn_options(), f)
    }

    pub fn read<F, R>(&self, op: &str, f: F) -> Result<R, TissueError>
    where
        F: FnOnce(&Connection) -> Result<R, TissueError>,
    {
        tracing::debug!(op, db = %self.db_path.display(), "read");
        pool::global_pool().with_read(&self.db_path, self.config.conn_options(), f)
    }

    /// Connections opened against this store's database so far.
    pub fn connections_opened(&self) -> u64 {
        pool::global_pool().connections_opened(&self.db_path)
    }
}
