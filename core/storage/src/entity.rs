//! Generic per entity-type storage with idempotent upserts and streaming scans.

use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Params, Row, Statement};
use std::collections::VecDeque;
use std::marker::PhantomData;
use tracing::{debug, error};

use geosync_common::{EntityId, Error, Result};

use crate::database::{storage_err, Database};

/// Rows fetched per batch by [`EntityStore::query_all`].
pub const DEFAULT_SCAN_BATCH: usize = 256;

/// A server-owned entity that maps onto one SQLite table.
///
/// The table must be keyed by the server-assigned `id` column, and
/// `UPSERT_SQL` must replace the whole row on conflict.
pub trait EntityRecord: Sized {
    /// Table name.
    const TABLE: &'static str;
    /// `CREATE TABLE IF NOT EXISTS` statement plus any indexes.
    const CREATE_SQL: &'static str;
    /// Column list in the order `from_row` reads them.
    const COLUMNS: &'static str;
    /// Full-row insert-or-replace statement bound by `bind_upsert`.
    const UPSERT_SQL: &'static str;

    /// Server-assigned primary key.
    fn id(&self) -> &EntityId;

    /// Execute the prepared `UPSERT_SQL` statement for this entity.
    fn bind_upsert(&self, stmt: &mut Statement<'_>) -> rusqlite::Result<usize>;

    /// Decode one row selected with `COLUMNS`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Read an [`EntityId`] column.
pub(crate) fn entity_id(row: &Row<'_>, idx: usize) -> rusqlite::Result<EntityId> {
    let raw: String = row.get(idx)?;
    EntityId::new(raw)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

/// Read a millisecond UTC timestamp column.
pub(crate) fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let millis: i64 = row.get(idx)?;
    DateTime::from_timestamp_millis(millis)
        .ok_or(rusqlite::Error::IntegralValueOutOfRange(idx, millis))
}

/// Durable table of one entity type.
pub struct EntityStore<E> {
    db: Database,
    _entity: PhantomData<fn() -> E>,
}

impl<E> Clone for EntityStore<E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E: EntityRecord> EntityStore<E> {
    /// Create a store on top of an open database.
    pub fn new(db: Database) -> Self {
        Self {
            db,
            _entity: PhantomData,
        }
    }

    /// Upsert a batch of entities in a single transaction.
    ///
    /// # Postconditions
    /// - On success every item's row exists with exactly the item's values
    /// - On failure no row of the batch was written
    ///
    /// # Errors
    /// - Any row-level failure (constraint violation, I/O); the batch is
    ///   rolled back
    pub fn upsert_all(&self, items: &[E]) -> Result<usize> {
        if items.is_empty() {
            return Ok(0);
        }

        let mut conn = self.db.lock()?;
        let tx = conn
            .transaction()
            .map_err(storage_err("failed to begin upsert"))?;
        {
            let mut stmt = tx
                .prepare_cached(E::UPSERT_SQL)
                .map_err(storage_err("failed to prepare upsert"))?;
            for item in items {
                if let Err(e) = item.bind_upsert(&mut stmt) {
                    error!(
                        "Upsert into {} failed at {}, rolling back {} rows: {}",
                        E::TABLE,
                        item.id(),
                        items.len(),
                        e
                    );
                    return Err(Error::Storage(format!(
                        "upsert into {} failed at {}: {}",
                        E::TABLE,
                        item.id(),
                        e
                    )));
                }
            }
        }
        tx.commit().map_err(storage_err("failed to commit upsert"))?;

        debug!("Upserted {} rows into {}", items.len(), E::TABLE);
        Ok(items.len())
    }

    /// Look up an entity by primary key.
    pub fn get(&self, id: &str) -> Result<Option<E>> {
        self.find_one("id = ?1", params![id])
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<u64> {
        let conn = self.db.lock()?;
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", E::TABLE), [], |row| {
                row.get(0)
            })
            .map_err(storage_err("failed to count rows"))?;
        Ok(count as u64)
    }

    /// Stream every row ordered by primary key.
    ///
    /// The table is read in batches of [`DEFAULT_SCAN_BATCH`] rows; the
    /// connection is only held while a batch is fetched. Call
    /// [`RowStream::close`] (or drop the stream) to release it early.
    pub fn query_all(&self) -> RowStream<E> {
        self.query_all_batched(DEFAULT_SCAN_BATCH)
    }

    /// Like [`query_all`](Self::query_all) with an explicit batch size.
    pub fn query_all_batched(&self, batch_size: usize) -> RowStream<E> {
        RowStream {
            db: Some(self.db.clone()),
            select_sql: format!(
                "SELECT {} FROM {} WHERE id > ?1 ORDER BY id LIMIT ?2",
                E::COLUMNS,
                E::TABLE
            ),
            last_id: String::new(),
            buffer: VecDeque::new(),
            batch_size: batch_size.max(1),
            _entity: PhantomData,
        }
    }

    /// Fetch the first row matching `where_clause`.
    pub(crate) fn find_one(&self, where_clause: &str, params: impl Params) -> Result<Option<E>> {
        let conn = self.db.lock()?;
        let sql = format!(
            "SELECT {} FROM {} WHERE {} LIMIT 1",
            E::COLUMNS,
            E::TABLE,
            where_clause
        );
        conn.query_row(&sql, params, E::from_row)
            .optional()
            .map_err(storage_err("failed to query row"))
    }
}

/// Closable, batched iterator over an entity table.
///
/// Yields `Err` at most once; after an error or after the last row the
/// stream is released and returns `None`.
pub struct RowStream<E> {
    db: Option<Database>,
    select_sql: String,
    last_id: String,
    buffer: VecDeque<E>,
    batch_size: usize,
    _entity: PhantomData<fn() -> E>,
}

impl<E: EntityRecord> RowStream<E> {
    /// Release the stream and its database handle.
    pub fn close(mut self) {
        self.release();
    }

    /// Whether the stream still holds its database handle.
    pub fn is_open(&self) -> bool {
        self.db.is_some() || !self.buffer.is_empty()
    }

    fn release(&mut self) {
        self.db = None;
        self.buffer.clear();
    }

    fn fetch_next_batch(&mut self) -> Result<()> {
        let batch = {
            let Some(db) = &self.db else {
                return Ok(());
            };
            let conn = db.lock()?;
            let mut stmt = conn
                .prepare_cached(&self.select_sql)
                .map_err(storage_err("failed to prepare scan"))?;
            let rows = stmt
                .query_map(params![self.last_id, self.batch_size as i64], E::from_row)
                .map_err(storage_err("failed to scan rows"))?;
            rows.collect::<rusqlite::Result<Vec<E>>>()
                .map_err(storage_err("failed to decode row"))?
        };

        if batch.len() < self.batch_size {
            self.db = None;
        }
        if let Some(last) = batch.last() {
            self.last_id = last.id().as_str().to_string();
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl<E: EntityRecord> Iterator for RowStream<E> {
    type Item = Result<E>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buffer.is_empty() && self.db.is_some() {
            if let Err(e) = self.fetch_next_batch() {
                self.release();
                return Some(Err(e));
            }
        }
        self.buffer.pop_front().map(Ok)
    }
}
