//! Cursor-paged participant backed by an entity table.

use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use tracing::{debug, error, warn};

use geosync_common::{Result, SyncKey};
use geosync_storage::{CursorStore, EntityRecord, EntityStore};

use crate::participant::{Participant, ParticipantFailure, SyncResult};
use crate::query::{SyncQuery, SyncRequest};
use crate::response::GraphQLResponse;

/// Page size requested from the server.
pub const DEFAULT_PAGE_SIZE: u32 = 500;

/// Ordering value sent as `orderBy`: oldest update first, so a resumed
/// cursor never skips rows updated between pages.
pub const ORDER_UPDATED_AT_ASC: &str = "UPDATED_AT_ASC";

/// An entity type that is synced through a remote connection field.
pub trait SyncEntity: EntityRecord + DeserializeOwned + Send + Sync + 'static {
    /// Participant name, query alias and cursor key.
    const KEY: &'static str;
    /// Remote connection field.
    const QUERY_NAME: &'static str;
    /// GraphQL type of the `orderBy` argument.
    const ORDER_BY_TYPE: &'static str;
    /// Name of the fragment selecting one node.
    const FRAGMENT_NAME: &'static str;
    /// Full fragment definition.
    const FRAGMENT: &'static str;
}

/// Participant that pages through one entity collection by cursor and
/// upserts every page into its table.
pub struct PagedParticipant<E> {
    key: SyncKey,
    query: SyncQuery,
    store: EntityStore<E>,
    cursors: Arc<dyn CursorStore>,
    page_size: u32,
}

impl<E: SyncEntity> PagedParticipant<E> {
    /// Create a participant writing into `store` and `cursors`.
    ///
    /// # Errors
    /// - `E::KEY` is not a valid sync key
    /// - `page_size` is zero
    pub fn new(store: EntityStore<E>, cursors: Arc<dyn CursorStore>, page_size: u32) -> Result<Self> {
        if page_size == 0 {
            return Err(geosync_common::Error::InvalidInput(
                "page size must be positive".to_string(),
            ));
        }
        let query = SyncQuery::new(E::QUERY_NAME, format!("...{}", E::FRAGMENT_NAME))
            .with_argument("first", "Int!")
            .with_argument("after", "String")
            .with_argument("orderBy", E::ORDER_BY_TYPE)
            .with_fragment(E::FRAGMENT);

        Ok(Self {
            key: SyncKey::new(E::KEY)?,
            query,
            store,
            cursors,
            page_size,
        })
    }

    /// The table this participant writes into.
    pub fn store(&self) -> &EntityStore<E> {
        &self.store
    }

    /// Build the request for the page following `cursor`.
    pub fn request_after(&self, cursor: Option<&str>) -> Result<SyncRequest> {
        let mut variables = Map::new();
        variables.insert("first".to_string(), json!(self.page_size));
        variables.insert("orderBy".to_string(), json!([ORDER_UPDATED_AT_ASC]));
        if let Some(cursor) = cursor {
            variables.insert("after".to_string(), json!(cursor));
        }
        SyncRequest::new(self.query.clone(), variables)
    }
}

impl<E: SyncEntity> Participant for PagedParticipant<E> {
    fn key(&self) -> &SyncKey {
        &self.key
    }

    fn initial_request(&self) -> Option<SyncRequest> {
        let cursor = match self.cursors.cursor_for_key(self.key.as_str()) {
            Ok(cursor) => cursor,
            Err(e) => {
                error!("Cannot read cursor for {}, skipping it this session: {}", self.key, e);
                return None;
            }
        };

        debug!(
            "Starting {} from {}",
            self.key,
            cursor.as_deref().unwrap_or("the beginning")
        );
        match self.request_after(cursor.as_deref()) {
            Ok(request) => Some(request),
            Err(e) => {
                error!("Cannot build request for {}: {}", self.key, e);
                None
            }
        }
    }

    fn save_response(&self, document: &Map<String, Value>) -> SyncResult {
        let page = match GraphQLResponse::<E>::from_document(document, self.key.as_str()) {
            Ok(page) => page,
            Err(e) => {
                warn!("Discarding page for {}: {}", self.key, e);
                return SyncResult::Failed(ParticipantFailure::Decode(e.to_string()));
            }
        };

        let GraphQLResponse { nodes, page_info } = page;
        if page_info.has_next_page && page_info.end_cursor.is_none() {
            warn!("Page for {} has a next page but no end cursor", self.key);
            return SyncResult::Failed(ParticipantFailure::Decode(
                "hasNextPage without endCursor".to_string(),
            ));
        }

        if let Err(e) = self.store.upsert_all(&nodes) {
            error!("Failed to store page for {}, cursor not advanced: {}", self.key, e);
            return SyncResult::Failed(ParticipantFailure::Storage(e.to_string()));
        }

        if let Some(cursor) = page_info.end_cursor.as_deref() {
            if let Err(e) = self.cursors.set_cursor_for_key(self.key.as_str(), cursor) {
                error!("Stored page for {} but failed to advance cursor: {}", self.key, e);
                return SyncResult::Failed(ParticipantFailure::Storage(e.to_string()));
            }
        }

        debug!(
            "Applied {} {} (has next page: {})",
            nodes.len(),
            self.key,
            page_info.has_next_page
        );

        if !page_info.has_next_page {
            return if nodes.is_empty() {
                SyncResult::NoData
            } else {
                SyncResult::NewData(None)
            };
        }

        match self.request_after(page_info.end_cursor.as_deref()) {
            Ok(next) => SyncResult::NewData(Some(next)),
            Err(e) => SyncResult::Failed(ParticipantFailure::Decode(e.to_string())),
        }
    }
}
