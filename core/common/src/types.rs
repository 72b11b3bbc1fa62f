//! Common types used throughout GeoSync.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of a synced entity collection.
///
/// A sync key doubles as the participant name, the alias of its
/// sub-selection in a batched query and the key of its persisted cursor,
/// so it must be a valid GraphQL name: ASCII letters, digits and
/// underscores, not starting with a digit.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SyncKey(String);

impl SyncKey {
    /// Create a new SyncKey from a string.
    ///
    /// # Errors
    /// - Returns error if the key is empty, starts with a digit, or
    ///   contains anything other than ASCII alphanumerics and `_`
    pub fn new(key: impl Into<String>) -> crate::Result<Self> {
        let key = key.into();
        let mut chars = key.chars();
        let Some(first) = chars.next() else {
            return Err(crate::Error::InvalidInput(
                "SyncKey cannot be empty".to_string(),
            ));
        };
        if first.is_ascii_digit() {
            return Err(crate::Error::InvalidInput(format!(
                "SyncKey '{}' cannot start with a digit",
                key
            )));
        }
        if !key.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
            return Err(crate::Error::InvalidInput(format!(
                "SyncKey '{}' may only contain ASCII letters, digits and '_'",
                key
            )));
        }
        Ok(Self(key))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SyncKey {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<SyncKey> for String {
    fn from(key: SyncKey) -> Self {
        key.0
    }
}

/// Server-assigned primary key of a synced entity.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Create a new EntityId.
    ///
    /// # Errors
    /// - Returns error if id is empty
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "EntityId cannot be empty".to_string(),
            ));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for EntityId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_sync_key_creation() {
        let key = SyncKey::new("geofences").unwrap();
        assert_eq!(key.as_str(), "geofences");
        assert_eq!(key.to_string(), "geofences");
    }

    #[test]
    fn test_sync_key_rejects_invalid_names() {
        assert!(SyncKey::new("").is_err());
        assert!(SyncKey::new("1beacons").is_err());
        assert!(SyncKey::new("geo-fences").is_err());
        assert!(SyncKey::new("geo fences").is_err());
    }

    #[test]
    fn test_sync_key_serde_validates() {
        let key: SyncKey = serde_json::from_str("\"beacons\"").unwrap();
        assert_eq!(key.as_str(), "beacons");
        assert!(serde_json::from_str::<SyncKey>("\"not valid\"").is_err());
    }

    #[test]
    fn test_entity_id_empty_fails() {
        assert!(EntityId::new("").is_err());
        assert_eq!(EntityId::new("gf_1").unwrap().as_str(), "gf_1");
    }

    proptest! {
        #[test]
        fn prop_graphql_names_are_valid_keys(name in "[A-Za-z_][A-Za-z0-9_]{0,31}") {
            prop_assert!(SyncKey::new(name).is_ok());
        }

        #[test]
        fn prop_keys_with_punctuation_are_rejected(
            prefix in "[a-z]{1,8}",
            bad in "[-. /:$]",
            suffix in "[a-z]{0,8}",
        ) {
            let name = format!("{}{}{}", prefix, bad, suffix);
            prop_assert!(SyncKey::new(name).is_err());
        }
    }
}
