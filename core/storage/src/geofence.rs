//! Geofence entities and their table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Row, Statement};
use serde::{Deserialize, Serialize};

use geosync_common::{EntityId, Result};

use crate::entity::{entity_id, timestamp, EntityRecord, EntityStore};

/// A circular geofence defined on the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    /// Server-assigned identifier.
    pub id: EntityId,
    /// Human readable description.
    pub description: String,
    /// Optional grouping tag.
    #[serde(default)]
    pub tag: Option<String>,
    /// Optional identifier in the customer's own system.
    #[serde(default)]
    pub external_id: Option<String>,
    /// Center latitude in degrees.
    pub latitude: f64,
    /// Center longitude in degrees.
    pub longitude: f64,
    /// Radius in meters.
    pub radius: f64,
    /// Whether the geofence is active.
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Last server-side modification, the sync ordering field.
    pub updated_at: DateTime<Utc>,
}

fn default_enabled() -> bool {
    true
}

impl EntityRecord for Geofence {
    const TABLE: &'static str = "geofences";

    const CREATE_SQL: &'static str = r#"
        CREATE TABLE IF NOT EXISTS geofences (
            id TEXT PRIMARY KEY,
            description TEXT NOT NULL,
            tag TEXT,
            external_id TEXT,
            latitude REAL NOT NULL CHECK (latitude BETWEEN -90.0 AND 90.0),
            longitude REAL NOT NULL CHECK (longitude BETWEEN -180.0 AND 180.0),
            radius REAL NOT NULL CHECK (radius > 0),
            enabled INTEGER NOT NULL,
            updated_at INTEGER NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_geofences_center
            ON geofences(latitude, longitude, radius);
    "#;

    const COLUMNS: &'static str =
        "id, description, tag, external_id, latitude, longitude, radius, enabled, updated_at";

    const UPSERT_SQL: &'static str = r#"
        INSERT OR REPLACE INTO geofences
        (id, description, tag, external_id, latitude, longitude, radius, enabled, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
    "#;

    fn id(&self) -> &EntityId {
        &self.id
    }

    fn bind_upsert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize> {
        stmt.execute(params![
            self.id.as_str(),
            self.description,
            self.tag,
            self.external_id,
            self.latitude,
            self.longitude,
            self.radius,
            self.enabled,
            self.updated_at.timestamp_millis(),
        ])
    }

    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: entity_id(row, 0)?,
            description: row.get(1)?,
            tag: row.get(2)?,
            external_id: row.get(3)?,
            latitude: row.get(4)?,
            longitude: row.get(5)?,
            radius: row.get(6)?,
            enabled: row.get(7)?,
            updated_at: timestamp(row, 8)?,
        })
    }
}

impl EntityStore<Geofence> {
    /// Find a geofence by its geometry: exact center and radius.
    pub fn find_by_center(
        &self,
        latitude: f64,
        longitude: f64,
        radius: f64,
    ) -> Result<Option<Geofence>> {
        self.find_one(
            "latitude = ?1 AND longitude = ?2 AND radius = ?3 ORDER BY updated_at DESC",
            params![latitude, longitude, radius],
        )
    }
}
