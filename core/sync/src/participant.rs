//! Participant contract: one entity type's sync logic.

use serde_json::{Map, Value};
use std::fmt;

use geosync_common::SyncKey;

use crate::query::SyncRequest;

/// Why a participant could not consume its page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParticipantFailure {
    /// The participant's slice of the document was missing or undecodable.
    /// Treated like a malformed document: the session is retried.
    Decode(String),
    /// Local persistence failed. The batch was rolled back and the cursor
    /// left untouched; contained in the participant.
    Storage(String),
}

impl fmt::Display for ParticipantFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParticipantFailure::Decode(reason) => write!(f, "decode failure: {}", reason),
            ParticipantFailure::Storage(reason) => write!(f, "storage failure: {}", reason),
        }
    }
}

/// Result of consuming one page.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncResult {
    /// Rows were applied. `Some` carries the request for the next page;
    /// `None` means the participant is fully synced for this session.
    NewData(Option<SyncRequest>),
    /// The page was empty and no further page exists.
    NoData,
    /// The page could not be applied.
    Failed(ParticipantFailure),
}

/// A per entity-type sync unit.
///
/// Participants are registered with the coordinator once at start-up and
/// own disjoint tables, so no cross-participant locking is needed.
pub trait Participant: Send + Sync {
    /// Name of the participant: its query alias and its cursor key.
    fn key(&self) -> &SyncKey;

    /// Request starting a fresh sync, resuming from the persisted cursor.
    ///
    /// `None` opts out of the current session.
    fn initial_request(&self) -> Option<SyncRequest>;

    /// Consume this participant's slice of a round's data object.
    ///
    /// Implementations must persist the page's rows before advancing the
    /// cursor, and only advance it if the rows were persisted.
    fn save_response(&self, document: &Map<String, Value>) -> SyncResult;
}
