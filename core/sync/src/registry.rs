//! Participant registry keyed by sync key.

use std::collections::BTreeMap;
use std::sync::Arc;

use geosync_common::{Error, Result};

use crate::participant::Participant;

/// Registry of sync participants.
///
/// Participants are kept in key order so every session visits them in the
/// same order.
#[derive(Default, Clone)]
pub struct ParticipantRegistry {
    participants: BTreeMap<String, Arc<dyn Participant>>,
}

impl ParticipantRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a participant.
    ///
    /// # Preconditions
    /// - The participant's key must be unique within the registry
    ///
    /// # Errors
    /// - Returns error if the key is already registered
    pub fn register(&mut self, participant: Arc<dyn Participant>) -> Result<()> {
        let key = participant.key().as_str().to_string();
        if self.participants.contains_key(&key) {
            return Err(Error::AlreadyExists(format!(
                "Participant '{}' is already registered",
                key
            )));
        }
        self.participants.insert(key, participant);
        Ok(())
    }

    /// All participants in key order.
    pub fn snapshot(&self) -> Vec<Arc<dyn Participant>> {
        self.participants.values().cloned().collect()
    }

    /// Registered keys in order.
    pub fn keys(&self) -> Vec<String> {
        self.participants.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::participant::SyncResult;
    use crate::query::SyncRequest;
    use geosync_common::SyncKey;
    use serde_json::{Map, Value};

    struct Idle(SyncKey);

    impl Participant for Idle {
        fn key(&self) -> &SyncKey {
            &self.0
        }

        fn initial_request(&self) -> Option<SyncRequest> {
            None
        }

        fn save_response(&self, _document: &Map<String, Value>) -> SyncResult {
            SyncResult::NoData
        }
    }

    fn idle(key: &str) -> Arc<dyn Participant> {
        Arc::new(Idle(SyncKey::new(key).unwrap()))
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ParticipantRegistry::new();
        registry.register(idle("geofences")).unwrap();
        registry.register(idle("beacons")).unwrap();

        assert_eq!(registry.keys(), vec!["beacons", "geofences"]);
        let keys: Vec<String> = registry
            .snapshot()
            .iter()
            .map(|p| p.key().to_string())
            .collect();
        assert_eq!(keys, registry.keys());
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut registry = ParticipantRegistry::new();
        registry.register(idle("beacons")).unwrap();

        assert!(matches!(
            registry.register(idle("beacons")),
            Err(Error::AlreadyExists(_))
        ));
        assert_eq!(registry.keys(), vec!["beacons"]);
    }
}
