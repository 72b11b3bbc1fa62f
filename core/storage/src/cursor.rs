//! Durable per entity-type sync cursors.

use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, info};

use geosync_common::Result;

use crate::database::{storage_err, Database};

pub(crate) const CURSOR_SCHEMA: &str = r#"
    CREATE TABLE IF NOT EXISTS sync_cursors (
        key TEXT PRIMARY KEY,
        cursor TEXT NOT NULL
    );
"#;

pub(crate) fn clear_cursors(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM sync_cursors", [])
        .map_err(storage_err("failed to clear cursors"))?;
    Ok(())
}

/// Key-value store of continuation cursors, one per entity type.
///
/// A cursor is the opaque `endCursor` of the last page whose rows were
/// durably applied. It is read when a session starts and written only after
/// the page's upsert committed.
pub trait CursorStore: Send + Sync {
    /// Get the persisted cursor for `key`, if any.
    fn cursor_for_key(&self, key: &str) -> Result<Option<String>>;

    /// Persist `cursor` for `key`, replacing any previous value.
    fn set_cursor_for_key(&self, key: &str, cursor: &str) -> Result<()>;

    /// Remove every cursor. The next session resyncs all entity types from
    /// scratch.
    fn clear_all(&self) -> Result<()>;

    /// All persisted `(key, cursor)` pairs, ordered by key.
    fn entries(&self) -> Result<Vec<(String, String)>>;
}

/// Cursor store backed by the `sync_cursors` table of a [`Database`].
#[derive(Clone)]
pub struct SqliteCursorStore {
    db: Database,
}

impl SqliteCursorStore {
    /// Create a cursor store on top of an open database.
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl CursorStore for SqliteCursorStore {
    fn cursor_for_key(&self, key: &str) -> Result<Option<String>> {
        let conn = self.db.lock()?;
        conn.query_row(
            "SELECT cursor FROM sync_cursors WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(storage_err("failed to read cursor"))
    }

    fn set_cursor_for_key(&self, key: &str, cursor: &str) -> Result<()> {
        debug!("Advancing cursor for {}", key);
        let conn = self.db.lock()?;
        conn.execute(
            "INSERT OR REPLACE INTO sync_cursors (key, cursor) VALUES (?1, ?2)",
            params![key, cursor],
        )
        .map_err(storage_err("failed to write cursor"))?;
        Ok(())
    }

    fn clear_all(&self) -> Result<()> {
        info!("Clearing all sync cursors");
        let conn = self.db.lock()?;
        clear_cursors(&conn)
    }

    fn entries(&self) -> Result<Vec<(String, String)>> {
        let conn = self.db.lock()?;
        let mut stmt = conn
            .prepare("SELECT key, cursor FROM sync_cursors ORDER BY key")
            .map_err(storage_err("failed to list cursors"))?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))
            .map_err(storage_err("failed to list cursors"))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(storage_err("failed to list cursors"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteCursorStore {
        SqliteCursorStore::new(Database::open_in_memory().unwrap())
    }

    #[test]
    fn test_missing_cursor_is_none() {
        assert_eq!(store().cursor_for_key("geofences").unwrap(), None);
    }

    #[test]
    fn test_set_replaces_previous_cursor() {
        let store = store();
        store.set_cursor_for_key("geofences", "c1").unwrap();
        store.set_cursor_for_key("geofences", "c2").unwrap();
        store.set_cursor_for_key("beacons", "b1").unwrap();

        assert_eq!(store.cursor_for_key("geofences").unwrap(), Some("c2".to_string()));
        assert_eq!(
            store.entries().unwrap(),
            vec![
                ("beacons".to_string(), "b1".to_string()),
                ("geofences".to_string(), "c2".to_string()),
            ]
        );
    }

    #[test]
    fn test_clear_all() {
        let store = store();
        store.set_cursor_for_key("geofences", "c1").unwrap();
        store.set_cursor_for_key("beacons", "b1").unwrap();
        store.clear_all().unwrap();

        assert!(store.entries().unwrap().is_empty());
        assert_eq!(store.cursor_for_key("beacons").unwrap(), None);
    }
}
