//! SQLite connection pool with read/write separation and retry logic.
//!
//! - Writes are serialized through a per-DB mutex, run inside a
//!   `BEGIN IMMEDIATE` transaction and retried on `SQLITE_BUSY` with
//!   exponential backoff (other processes may hold the write lock).
//! - Reads open a fresh connection and run inside a deferred transaction, so
//!   every query of one operation sees the same WAL snapshot.
//!
//! Connections are NOT cached between operations. Every open is counted per
//! database so callers can assert that an operation stays at a constant
//! number of round trips.

use crate::core::db;
use crate::core::error::TissueError;
use rusqlite::{Connection, Transaction, TransactionBehavior};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};
use std::thread;
use std::time::Duration;

/// Base delay for exponential backoff (milliseconds).
const BASE_DELAY_MS: u64 = 50;
/// Maximum delay cap (milliseconds).
const MAX_DELAY_MS: u64 = 2_000;

/// Per-call connection settings, usually taken from the store config.
#[derive(Debug, Clone, Copy)]
pub struct ConnOptions {
    pub busy_timeout_secs: u32,
    pub max_retries: u32,
}

impl Default for ConnOptions {
    fn default() -> Self {
        Self {
            busy_timeout_secs: 5,
            max_retries: 5,
        }
    }
}

struct PoolEntry {
    write_lock: Mutex<()>,
    db_path: PathBuf,
    opened: AtomicU64,
}

pub struct SqlitePool {
    entries: Mutex<HashMap<PathBuf, &'static PoolEntry>>,
}

impl SqlitePool {
    fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get_entry(&self, db_path: &Path) -> Result<&'static PoolEntry, TissueError> {
        let key = db_path.to_path_buf();
        let mut entries = self.entries.lock().map_err(|_| {
            TissueError::ValidationError("SqlitePool entries lock poisoned".to_string())
        })?;
        if let Some(entry) = entries.get(&key) {
            return Ok(*entry);
        }
        let entry = Box::leak(Box::new(PoolEntry {
            write_lock: Mutex::new(()),
            db_path: key.clone(),
            opened: AtomicU64::new(0),
        }));
        entries.insert(key, entry);
        Ok(entry)
    }

    fn open(entry: &PoolEntry, opts: ConnOptions) -> Result<Connection, TissueError> {
        entry.opened.fetch_add(1, Ordering::SeqCst);
        db::db_connect(&entry.db_path.to_string_lossy(), opts.busy_timeout_secs)
    }

    /// Run `f` inside an immediate write transaction. The transaction commits
    /// when `f` returns `Ok` and rolls back otherwise. Busy errors retry the
    /// whole closure.
    pub fn with_write<F, R>(&self, db_path: &Path, opts: ConnOptions, mut f: F) -> Result<R, TissueError>
    where
        F: FnMut(&Connection) -> Result<R, TissueError>,
    {
        let entry = self.get_entry(db_path)?;
        let _guard = entry
            .write_lock
            .lock()
            .map_err(|_| TissueError::ValidationError("Pool write lock poisoned".to_string()))?;

        let conn = Self::open(entry, opts)?;
        retry_on_busy(opts.max_retries, || {
            let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Immediate)?;
            let out = f(&tx)?;
            tx.commit()?;
            Ok(out)
        })
    }

    /// Run `f` against a fresh connection inside a deferred read transaction.
    pub fn with_read<F, R>(&self, db_path: &Path, opts: ConnOptions, f: F) -> Result<R, TissueError>
    where
        F: FnOnce(&Connection) -> Result<R, TissueError>,
    {
        let entry = self.get_entry(db_path)?;
        let conn = Self::open(entry, opts)?;
        let tx = Transaction::new_unchecked(&conn, TransactionBehavior::Deferred)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Number of connections opened for `db_path` since process start.
    pub fn connections_opened(&self, db_path: &Path) -> u64 {
        self.get_entry(db_path)
            .map(|e| e.opened.load(Ordering::SeqCst))
            .unwrap_or(0)
    }
}

fn retry_on_busy<F, R>(max_retries: u32, mut f: F) -> Result<R, TissueError>
where
    F: FnMut() -> Result<R, TissueError>,
{
    let mut attempt = 0u32;
    loop {
        match f() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy_error(&e) && attempt < max_retries => {
                attempt += 1;
                let delay_ms = (BASE_DELAY_MS * 2u64.pow(attempt - 1)).min(MAX_DELAY_MS);
                tracing::debug!(attempt, delay_ms, "sqlite busy, retrying write");
                thread::sleep(Duration::from_millis(delay_ms));
            }
            Err(e) => return Err(e),
        }
    }
}

fn is_busy_error(err: &TissueError) -> bool {
    match err {
        TissueError::RusqliteError(rusqlite::Error::SqliteFailure(code, _)) => matches!(
            code.code,
            rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
        ),
        _ => false,
    }
}

/// Global pool instance (same lifetime as the process).
pub fn global_pool() -> &'static SqlitePool {
    static POOL: OnceLock<SqlitePool> = OnceLock::new();
    POOL.get_or_init(SqlitePool::new)
}
