//! Local persistence for GeoSync.
//!
//! This module provides the device-local replica that sync sessions write
//! into:
//! - A SQLite [`Database`] with a versioned schema
//! - A durable [`CursorStore`] holding one continuation cursor per entity type
//! - Per entity-type [`EntityStore`]s with idempotent, transactional upserts
//!   and streaming scans
//!
//! # Design Principles
//! - Server is authoritative: every upsert replaces the full row
//! - A schema version bump drops the entity tables and clears every cursor,
//!   forcing a full resync on the next session
//! - Scans stream in bounded batches and never hold the connection between
//!   batches

pub mod beacon;
pub mod cursor;
pub mod database;
pub mod entity;
pub mod geofence;
pub mod memory;

pub use beacon::Beacon;
pub use cursor::{CursorStore, SqliteCursorStore};
pub use database::{Database, SCHEMA_VERSION};
pub use entity::{EntityRecord, EntityStore, RowStream};
pub use geofence::Geofence;
pub use memory::MemoryCursorStore;
