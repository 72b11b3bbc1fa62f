//! In-process GraphQL server for coordinator tests.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use tokio::sync::Semaphore;

use crate::query::BatchedQuery;
use crate::transport::{Transport, TransportOutcome};

/// Opaque cursor the server hands out after `offset` rows.
pub(crate) fn cursor(offset: usize) -> String {
    format!("cursor-{}", offset)
}

fn offset_of(cursor: &str) -> usize {
    cursor
        .strip_prefix("cursor-")
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// `count` geofences in server order.
pub(crate) fn geofence_rows(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "id": format!("gf_{:05}", i),
                "description": format!("Geofence {}", i),
                "latitude": 52.0 + (i as f64) * 0.0001,
                "longitude": 13.0,
                "radius": 100.0,
                "updatedAt": "2024-05-01T08:00:00Z"
            })
        })
        .collect()
}

/// `count` beacons in server order.
pub(crate) fn beacon_rows(count: usize) -> Vec<Value> {
    (0..count)
        .map(|i| {
            json!({
                "id": format!("b_{:05}", i),
                "description": format!("Beacon {}", i),
                "uuid": "f7826da6-4fa2-4e98-8024-bc5b71e0893e",
                "major": 1,
                "minor": i % 65536,
                "updatedAt": "2024-05-01T08:00:00Z"
            })
        })
        .collect()
}

/// Serves each collection in pages keyed by offset cursors.
///
/// Calls are numbered from 1 across all sessions; [`fail_round`] replaces
/// the answer to one call. A [`gated`] server holds every call until
/// [`open_gate`].
///
/// [`fail_round`]: FakeServer::fail_round
/// [`gated`]: FakeServer::gated
/// [`open_gate`]: FakeServer::open_gate
#[derive(Default)]
pub(crate) struct FakeServer {
    collections: BTreeMap<String, Vec<Value>>,
    overrides: Mutex<HashMap<usize, TransportOutcome>>,
    requests: Mutex<Vec<BatchedQuery>>,
    gate: Option<Semaphore>,
}

impl FakeServer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_collection(mut self, alias: &str, rows: Vec<Value>) -> Self {
        self.collections.insert(alias.to_string(), rows);
        self
    }

    pub(crate) fn gated(mut self) -> Self {
        self.gate = Some(Semaphore::new(0));
        self
    }

    pub(crate) fn open_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.add_permits(1);
        }
    }

    pub(crate) fn fail_round(&self, call: usize, outcome: TransportOutcome) {
        self.overrides.lock().unwrap().insert(call, outcome);
    }

    pub(crate) fn requests(&self) -> Vec<BatchedQuery> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    fn page(&self, alias: &str, offset: usize, first: usize) -> Value {
        let rows = self.collections.get(alias).map(Vec::as_slice).unwrap_or(&[]);
        let start = offset.min(rows.len());
        let end = (start + first).min(rows.len());
        let nodes = &rows[start..end];
        let end_cursor = if nodes.is_empty() {
            Value::Null
        } else {
            Value::String(cursor(end))
        };

        json!({
            "nodes": nodes,
            "pageInfo": {"endCursor": end_cursor, "hasNextPage": end < rows.len()}
        })
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn execute(&self, query: &BatchedQuery) -> TransportOutcome {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(query.clone());
            requests.len()
        };
        if let Some(gate) = &self.gate {
            let _permit = gate.acquire().await.unwrap();
        }
        if let Some(outcome) = self.overrides.lock().unwrap().remove(&call) {
            return outcome;
        }

        let mut data = Map::new();
        for alias in query.aliases() {
            let first = query
                .variable(alias, "first")
                .and_then(Value::as_u64)
                .unwrap_or(0) as usize;
            let offset = query
                .variable(alias, "after")
                .and_then(Value::as_str)
                .map(offset_of)
                .unwrap_or(0);
            data.insert(alias.clone(), self.page(alias, offset, first));
        }

        let body = serde_json::to_vec(&json!({ "data": data })).unwrap();
        TransportOutcome::Success(Bytes::from(body))
    }
}
