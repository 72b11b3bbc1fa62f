//! Beacon participant.

use geosync_storage::Beacon;

use super::paged::{PagedParticipant, SyncEntity};

impl SyncEntity for Beacon {
    const KEY: &'static str = "beacons";
    const QUERY_NAME: &'static str = "beacons";
    const ORDER_BY_TYPE: &'static str = "[BeaconsOrderBy!]";
    const FRAGMENT_NAME: &'static str = "BeaconFields";
    const FRAGMENT: &'static str = r#"
fragment BeaconFields on Beacon {
  id
  description
  uuid
  major
  minor
  latitude
  longitude
  enabled
  updatedAt
}"#;
}

/// Syncs the `beacons` collection into the `beacons` table.
pub type BeaconParticipant = PagedParticipant<Beacon>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::{Participant, SyncResult};
    use crate::query::BatchedQuery;
    use geosync_storage::{CursorStore, Database, EntityStore, SqliteCursorStore};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_beacon_page_roundtrip_through_sqlite() {
        let db = Database::open_in_memory().unwrap();
        let cursors = SqliteCursorStore::new(db.clone());
        let participant = BeaconParticipant::new(
            EntityStore::<Beacon>::new(db),
            Arc::new(cursors.clone()),
            500,
        )
        .unwrap();

        let document = json!({
            "beacons": {
                "nodes": [{
                    "id": "b_1",
                    "description": "Entrance",
                    "uuid": "F7826DA6-4FA2-4E98-8024-BC5B71E0893E",
                    "major": 10,
                    "minor": 3,
                    "updatedAt": "2024-05-01T08:00:00Z"
                }],
                "pageInfo": {"endCursor": "b-cursor-1", "hasNextPage": false}
            }
        });

        let result = participant.save_response(document.as_object().unwrap());
        assert_eq!(result, SyncResult::NewData(None));
        assert_eq!(
            cursors.cursor_for_key("beacons").unwrap(),
            Some("b-cursor-1".to_string())
        );

        let stored = participant
            .store()
            .find_by_identity("f7826da6-4fa2-4e98-8024-bc5b71e0893e", 10, 3)
            .unwrap()
            .unwrap();
        assert_eq!(stored.description, "Entrance");
    }

    #[test]
    fn test_batched_with_geofences_shares_one_operation() {
        use crate::participants::GeofenceParticipant;
        use geosync_storage::{Geofence, MemoryCursorStore};

        let db = Database::open_in_memory().unwrap();
        let cursors: Arc<dyn CursorStore> = Arc::new(MemoryCursorStore::new());
        let beacons =
            BeaconParticipant::new(EntityStore::<Beacon>::new(db.clone()), cursors.clone(), 500)
                .unwrap();
        let geofences =
            GeofenceParticipant::new(EntityStore::<Geofence>::new(db), cursors, 500).unwrap();

        let b = beacons.initial_request().unwrap();
        let g = geofences.initial_request().unwrap();
        let batch = BatchedQuery::compose([("beacons", &b), ("geofences", &g)]);

        let op = batch.operation();
        assert!(op.contains("$beacons_orderBy: [BeaconsOrderBy!]"));
        assert!(op.contains("geofences: geofences(first: $geofences_first, orderBy: $geofences_orderBy)"));
        assert!(op.contains("fragment BeaconFields on Beacon"));
        assert!(op.contains("fragment GeofenceFields on Geofence"));
        assert_eq!(batch.variable("beacons", "first"), Some(&json!(500)));
    }
}
