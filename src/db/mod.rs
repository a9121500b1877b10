//! Catalog store: items, their face embeddings and assigned cluster ids.
//!
//! The catalog is the source of truth for idempotent ingestion. Every
//! mutation is committed (`synchronous = FULL`) before the call returns.

mod schema;
pub mod clusters;
pub mod embeddings;
pub mod items;
pub mod runs;

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::error::CatalogError;

pub use schema::SCHEMA;
pub use clusters::ClusterSummary;
pub use embeddings::EmbeddingRecord;
pub use items::{Item, NewItem};
pub use runs::{IngestRun, RunStatus};

pub type ItemId = i64;
pub type EmbeddingId = i64;
pub type ClusterId = i64;

/// Cluster id reserved for embeddings with no sufficiently dense neighborhood.
pub const NOISE_CLUSTER_ID: ClusterId = -1;

pub type CatalogResult<T> = std::result::Result<T, CatalogError>;

/// SQLite-backed catalog.
///
/// The connection sits behind a mutex so ingestion workers can share one
/// catalog. The lock is only held for a single statement or transaction.
pub struct Catalog {
    conn: Mutex<Connection>,
}

impl Catalog {
    pub fn open(path: &Path) -> CatalogResult<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(|source| CatalogError::StoreUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::configure(&conn).map_err(|source| CatalogError::StoreUnavailable {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    pub fn open_in_memory() -> CatalogResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::configure(&conn)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    fn configure(conn: &Connection) -> rusqlite::Result<()> {
        conn.busy_timeout(Duration::from_secs(5))?;
        let _mode: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        conn.pragma_update(None, "synchronous", "FULL")?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        Ok(())
    }

    /// Create tables and indexes. Safe to call on every start.
    pub fn initialize(&self) -> CatalogResult<()> {
        self.conn().execute_batch(SCHEMA)?;
        Ok(())
    }

    pub(crate) fn conn(&self) -> MutexGuard<'_, Connection> {
        // Open transactions roll back on drop, so a poisoned lock still guards a consistent connection.
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Is this a UNIQUE constraint violation?
pub(crate) fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}
