//! Bluetooth beacon entities and their table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Statement};
use serde::{Deserialize, Serialize};

use geosync_common::{EntityId, Result};

use crate::entity::{entity_id, timestamp, EntityRecord, EntityStore};

/// An iBeacon-style region registered on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Beacon {
    pub id: EntityId,
    pub description: String,
    /// Proximity UUID.
    pub uuid: String,
    pub major: u16,
    pub minor: u16,
    #[serde(default)]
    pub latitude: Option<f64>,
    #[serde(default)]
    pub longitude: Option<f64>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl EntityRecord for Beacon {
    const TABLE: &'static str = "beacons";

    const CREATE_SQL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS beacons (
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            uuid TEXT NOT NULL,
            major INTEGER NOT NULL CHECK (major BETWEEN 0 AND 65535),
            minor INTEGER NOT NULL CHECK (minor BETWEEN 0 AND 65535),
            latitude REAL,
            longitude REAL,
            enabled INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_beacons_identity
            ON beacons(uuid COLLATE NOCASE, major, minor);
    "#;

    const COLUMNS: &'static str =
        "id, description, uuid, major, minor, latitude, longitude, enabled, updated_at";

    const UPSERT_SQL: &'static str = r#"
        INSERT OR REPLACE INTO beacons
        (id, description, uuid, major, minor, latitude, longitude, enabled, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    "#;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn bind_upsert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.id.as_str(),
            self.description,
            self.uuid,
            self.major,
            self.minor,
            self.latitude,
            self.longitude,
            self.enabled,
            self.updated_at.timestamp_millis(),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: entity_id(row, 0)?,
            description: row.get(1)?,
            uuid: row.get(2)?,
            major: row.get(3)?,
            minor: row.get(4)?,
            latitude: row.get(5)?,
            longitude: row.get(6)?,
            enabled: row.get(7)?,
            updated_at: timestamp(row, 8)?,
        })
    }
}

impl EntityStore<Beacon> {
    /// Find a beacon by its radio identity. The UUID compares
    /// case-insensitively.
    pub fn find_by_identity(&self, uuid: &str, major: u16, minor: u16) -> Result<Option<Beacon>> {
        self.find_one(
            "uuid = ?1 COLLATE NOCASE AND major = ?2 AND minor = ?3 ORDER BY updated_at DESC",
            params![uuid, major, minor],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::Database;

    const UUID: &str = "F7826DA6-4FA2-4E98-8024-BC5B71E0893E";

    fn beacon(id: &str, major: u16, minor: u16) -> Beacon {
        Beacon {
            id: EntityId::new(id).unwrap(),
            description: format!("Beacon {}", id),
            uuid: UUID.to_string(),
            major,
            minor,
            latitude: None,
            longitude: None,
            enabled: true,
            updated_at: DateTime::from_timestamp_millis(1_700_000_000_000).unwrap(),
        }
    }

    #[test]
    fn test_upsert_and_find_by_identity() {
        let store = EntityStore::<Beacon>::new(Database::open_in_memory().unwrap());
        store
            .upsert_all(&[beacon("b_1", 1, 1), beacon("b_2", 1, 2)])
            .unwrap();

        let found = store
            .find_by_identity(&UUID.to_lowercase(), 1, 2)
            .unwrap()
            .unwrap();
        assert_eq!(found.id.as_str(), "b_2");
        assert!(store.find_by_identity(UUID, 9, 9).unwrap().is_none());
    }

    #[test]
    fn test_second_upsert_wins() {
        let store = EntityStore::<Beacon>::new(Database::open_in_memory().unwrap());
        store.upsert_all(&[beacon("b_1", 1, 1)]).unwrap();

        let mut moved = beacon("b_1", 7, 8);
        moved.latitude = Some(51.0);
        moved.longitude = Some(7.0);
        store.upsert_all(&[moved.clone()]).unwrap();

        assert_eq!(store.count().unwrap(), 1);
        assert_eq!(store.get("b_1").unwrap(), Some(moved));
    }

    #[test]
    fn test_rejects_empty_id_from_wire() {
        let json = r#"{"id": "", "description": "x", "uuid": "u", "major": 1, "minor": 2,
                       "updatedAt": "2024-03-01T12:00:00Z"}"#;
        assert!(serde_json::from_str::<Beacon>(json).is_err());
    }
}
