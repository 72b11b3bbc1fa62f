//! SQLite database holding the local replica and its sync cursors.

use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::{debug, info};

use geosync_common::{Error, Result};

use crate::beacon::Beacon;
use crate::cursor;
use crate::entity::EntityRecord;
use crate::geofence::Geofence;

/// Current version of the entity table layout.
///
/// Bumping this drops and recreates every entity table and clears all
/// cursors on the next open. There are no in-place migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// Entity tables owned by the schema version, as `(name, create statement)`.
const ENTITY_TABLES: [(&str, &str); 2] = [
    (<Geofence as EntityRecord>::TABLE, <Geofence as EntityRecord>::CREATE_SQL),
    (<Beacon as EntityRecord>::TABLE, <Beacon as EntityRecord>::CREATE_SQL),
];

/// Maps a rusqlite error into a storage error with some context.
pub(crate) fn storage_err(context: &'static str) -> impl Fn(rusqlite::Error) -> Error {
    move |e| Error::Storage(format!("{}: {}", context, e))
}

/// Shared handle to the local SQLite database.
///
/// Cloning is cheap; all clones share one connection guarded by a mutex.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open (or create) the database at `path`.
    ///
    /// # Postconditions
    /// - Cursor and entity tables exist
    /// - If the stored schema version differs from [`SCHEMA_VERSION`], entity
    ///   tables were recreated empty and all cursors cleared
    ///
    /// # Errors
    /// - Database cannot be opened or migrated
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_version(path, SCHEMA_VERSION)
    }

    /// Open an in-memory database (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(storage_err("failed to open in-memory database"))?;
        Self::init(conn, SCHEMA_VERSION)
    }

    pub(crate) fn open_with_version(path: impl AsRef<Path>, version: u32) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(path).map_err(storage_err("failed to open database"))?;
        info!("Opened local database at {}", path.display());
        Self::init(conn, version)
    }

    fn init(conn: Connection, version: u32) -> Result<Self> {
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.migrate(version)?;
        Ok(db)
    }

    fn migrate(&self, version: u32) -> Result<()> {
        let mut conn = self.lock()?;
        let tx = conn
            .transaction()
            .map_err(storage_err("failed to begin migration"))?;

        tx.execute_batch(cursor::CURSOR_SCHEMA)
            .map_err(storage_err("failed to create cursor table"))?;

        let current: u32 = tx
            .query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(storage_err("failed to read schema version"))?;

        if current != version {
            if current == 0 {
                debug!("Initializing schema version {}", version);
            } else {
                info!(
                    "Schema version changed from {} to {}, forcing full resync",
                    current, version
                );
            }
            for (table, _) in ENTITY_TABLES {
                tx.execute_batch(&format!("DROP TABLE IF EXISTS {}", table))
                    .map_err(storage_err("failed to drop entity table"))?;
            }
            cursor::clear_cursors(&tx)?;
            tx.pragma_update(None, "user_version", version)
                .map_err(storage_err("failed to write schema version"))?;
        }

        for (_, create_sql) in ENTITY_TABLES {
            tx.execute_batch(create_sql)
                .map_err(storage_err("failed to create entity table"))?;
        }

        tx.commit().map_err(storage_err("failed to commit migration"))
    }

    /// Schema version recorded in the database file.
    pub fn schema_version(&self) -> Result<u32> {
        let conn = self.lock()?;
        conn.query_row("PRAGMA user_version", [], |row| row.get(0))
            .map_err(storage_err("failed to read schema version"))
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| Error::Storage("database connection lock poisoned".to_string()))
    }
}
