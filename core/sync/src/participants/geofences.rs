//! Geofence participant.

use geosync_storage::Geofence;

use super::paged::{PagedParticipant, SyncEntity};

impl SyncEntity for Geofence {
    const KEY: &'static str = "geofences";
    const QUERY_NAME: &'static str = "geofences";
    const ORDER_BY_TYPE: &'static str = "[GeofencesOrderBy!]";
    const FRAGMENT_NAME: &'static str = "GeofenceFields";
    const FRAGMENT: &'static str = r#"
fragment GeofenceFields on Geofence {
  id
  description
  tag
  externalId
  latitude
  longitude
  radius
  enabled
  updatedAt
}"#;
}

/// Syncs the `geofences` collection into the `geofences` table.
pub type GeofenceParticipant = PagedParticipant<Geofence>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::{Participant, ParticipantFailure, SyncResult};
    use geosync_storage::{CursorStore, Database, EntityStore, MemoryCursorStore};
    use serde_json::{json, Map, Value};
    use std::sync::Arc;

    fn setup() -> (GeofenceParticipant, MemoryCursorStore) {
        let cursors = MemoryCursorStore::new();
        let store = EntityStore::<Geofence>::new(Database::open_in_memory().unwrap());
        let participant = GeofenceParticipant::new(store, Arc::new(cursors.clone()), 2).unwrap();
        (participant, cursors)
    }

    fn node(id: &str, radius: f64) -> Value {
        json!({
            "id": id,
            "description": format!("Fence {}", id),
            "latitude": 52.52,
            "longitude": 13.40,
            "radius": radius,
            "updatedAt": "2024-05-01T08:00:00Z"
        })
    }

    fn document(nodes: Vec<Value>, end_cursor: Option<&str>, has_next_page: bool) -> Map<String, Value> {
        json!({
            "geofences": {
                "nodes": nodes,
                "pageInfo": {"endCursor": end_cursor, "hasNextPage": has_next_page}
            }
        })
        .as_object()
        .cloned()
        .unwrap()
    }

    #[test]
    fn test_initial_request_without_cursor() {
        let (participant, _) = setup();
        let request = participant.initial_request().unwrap();

        assert_eq!(request.query().name(), "geofences");
        assert_eq!(request.variable("first"), Some(&json!(2)));
        assert_eq!(request.variable("orderBy"), Some(&json!(["UPDATED_AT_ASC"])));
        assert_eq!(request.variable("after"), None);
    }

    #[test]
    fn test_initial_request_resumes_from_cursor() {
        let (participant, cursors) = setup();
        cursors.set_cursor_for_key("geofences", "c-42").unwrap();

        let request = participant.initial_request().unwrap();
        assert_eq!(request.variable("after"), Some(&json!("c-42")));
    }

    #[test]
    fn test_page_with_next_page_advances_cursor() {
        let (participant, cursors) = setup();
        let result = participant.save_response(&document(
            vec![node("gf_1", 100.0), node("gf_2", 120.0)],
            Some("c2"),
            true,
        ));

        let SyncResult::NewData(Some(next)) = result else {
            panic!("expected a next request, got {:?}", result);
        };
        assert_eq!(next.variable("after"), Some(&json!("c2")));
        assert_eq!(cursors.cursor_for_key("geofences").unwrap(), Some("c2".to_string()));
        assert_eq!(participant.store().count().unwrap(), 2);
    }

    #[test]
    fn test_last_page_finishes() {
        let (participant, cursors) = setup();
        let result = participant.save_response(&document(vec![node("gf_1", 100.0)], Some("c1"), false));

        assert_eq!(result, SyncResult::NewData(None));
        assert_eq!(cursors.cursor_for_key("geofences").unwrap(), Some("c1".to_string()));
    }

    #[test]
    fn test_empty_last_page_is_no_data_and_keeps_cursor() {
        let (participant, cursors) = setup();
        cursors.set_cursor_for_key("geofences", "c9").unwrap();

        let result = participant.save_response(&document(vec![], None, false));
        assert_eq!(result, SyncResult::NoData);
        assert_eq!(cursors.cursor_for_key("geofences").unwrap(), Some("c9".to_string()));
    }

    #[test]
    fn test_storage_failure_keeps_cursor() {
        let (participant, cursors) = setup();
        cursors.set_cursor_for_key("geofences", "c1").unwrap();

        let result = participant.save_response(&document(
            vec![node("gf_1", 100.0), node("gf_2", -1.0)],
            Some("c2"),
            true,
        ));

        assert!(matches!(result, SyncResult::Failed(ParticipantFailure::Storage(_))));
        assert_eq!(cursors.cursor_for_key("geofences").unwrap(), Some("c1".to_string()));
        assert_eq!(participant.store().count().unwrap(), 0);
    }

    #[test]
    fn test_missing_selection_is_decode_failure() {
        let (participant, _) = setup();
        let result = participant.save_response(&Map::new());
        assert!(matches!(result, SyncResult::Failed(ParticipantFailure::Decode(_))));
    }

    #[test]
    fn test_next_page_without_cursor_is_rejected() {
        let (participant, cursors) = setup();
        let result = participant.save_response(&document(vec![node("gf_1", 100.0)], None, true));

        assert!(matches!(result, SyncResult::Failed(ParticipantFailure::Decode(_))));
        assert_eq!(participant.store().count().unwrap(), 0);
        assert_eq!(cursors.cursor_for_key("geofences").unwrap(), None);
    }

    #[test]
    fn test_zero_page_size_is_rejected() {
        let store = EntityStore::<Geofence>::new(Database::open_in_memory().unwrap());
        assert!(GeofenceParticipant::new(store, Arc::new(MemoryCursorStore::new()), 0).is_err());
    }
}
