//! SQLite-backed record store.

use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, Row};
use serde_json::{Map, Value};

use crate::error::{StowageError, StowageResult};

use super::{Record, RecordBoundary, RecordPredicate, RecordSort, RecordStore};

const RECORD_SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS records (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    container  TEXT NOT NULL,
    context    TEXT NOT NULL,
    entity     TEXT NOT NULL,
    key        TEXT NOT NULL,
    fields     TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    UNIQUE (container, context, entity, key)
);
CREATE INDEX IF NOT EXISTS idx_records_entity ON records (container, context, entity);
"#;

/// SQLite-backed record store.
#[derive(Clone)]
pub struct SqliteRecordStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteRecordStore {
    /// Open a file-backed store.
    pub fn open(path: &Path) -> StowageResult<Self> {
        let conn = Connection::open(path)?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Create an in-memory store (for testing).
    pub fn memory() -> StowageResult<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init_connection(&conn)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn init_connection(conn: &Connection) -> StowageResult<()> {
        // WAL mode for file-backed DBs (no-op for in-memory)
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");
        conn.execute_batch(RECORD_SCHEMA)?;
        Ok(())
    }

    async fn with_conn<F, R>(&self, f: F) -> StowageResult<R>
    where
        F: FnOnce(&mut Connection) -> StowageResult<R> + Send + 'static,
        R: Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut guard)
        })
        .await
        .map_err(|e| StowageError::Record {
            message: format!("record task failed: {e}"),
        })?
    }
}

impl std::fmt::Debug for SqliteRecordStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteRecordStore").finish_non_exhaustive()
    }
}

fn record_from_row(row: &Row<'_>) -> rusqlite::Result<(i64, String, String, String)> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
}

fn decode(raw: (i64, String, String, String)) -> StowageResult<Record> {
    let (id, entity, key, fields) = raw;
    let fields: Map<String, Value> =
        serde_json::from_str(&fields).map_err(|e| StowageError::InvalidData {
            message: format!("{entity} '{key}' has malformed fields: {e}"),
        })?;
    Ok(Record {
        id: Some(id),
        entity,
        key,
        fields,
    })
}

fn select_sql(predicate: &RecordPredicate, sort: RecordSort) -> String {
    let mut sql = String::from(
        "SELECT id, entity, key, fields FROM records \
         WHERE container = ?1 AND context = ?2 AND entity = ?3",
    );
    match predicate {
        RecordPredicate::All => {}
        RecordPredicate::KeyEquals(_) => sql.push_str(" AND key = ?4"),
        RecordPredicate::IdEquals(_) => sql.push_str(" AND id = ?4"),
    }
    sql.push_str(match sort {
        RecordSort::Unsorted => "",
        RecordSort::KeyAscending => " ORDER BY key ASC",
        RecordSort::KeyDescending => " ORDER BY key DESC",
        RecordSort::IdAscending => " ORDER BY id ASC",
        RecordSort::IdDescending => " ORDER BY id DESC",
    });
    sql
}

fn query(
    conn: &Connection,
    boundary: &RecordBoundary,
    entity: &str,
    predicate: &RecordPredicate,
    sort: RecordSort,
) -> StowageResult<Vec<Record>> {
    let mut stmt = conn.prepare(&select_sql(predicate, sort))?;
    let rows = match predicate {
        RecordPredicate::All => stmt
            .query_map(
                params![boundary.container(), boundary.context(), entity],
                record_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        RecordPredicate::KeyEquals(key) => stmt
            .query_map(
                params![boundary.container(), boundary.context(), entity, key],
                record_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?,
        RecordPredicate::IdEquals(id) => stmt
            .query_map(
                params![boundary.container(), boundary.context(), entity, id],
                record_from_row,
            )?
            .collect::<rusqlite::Result<Vec<_>>>()?,
    };
    rows.into_iter().map(decode).collect()
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn fetch_one(
        &self,
        boundary: &RecordBoundary,
        entity: &str,
        predicate: &RecordPredicate,
    ) -> StowageResult<Option<Record>> {
        let records = self
            .fetch_all(boundary, entity, predicate, RecordSort::IdAscending)
            .await?;
        Ok(records.into_iter().next())
    }

    async fn fetch_all(
        &self,
        boundary: &RecordBoundary,
        entity: &str,
        predicate: &RecordPredicate,
        sort: RecordSort,
    ) -> StowageResult<Vec<Record>> {
        let boundary = boundary.clone();
        let entity = entity.to_string();
        let predicate = predicate.clone();
        self.with_conn(move |conn| query(conn, &boundary, &entity, &predicate, sort))
            .await
    }

    async fn insert_or_replace(
        &self,
        boundary: &RecordBoundary,
        record: Record,
    ) -> StowageResult<Record> {
        let boundary = boundary.clone();
        self.with_conn(move |conn| {
            let fields = serde_json::to_string(&record.fields).map_err(|e| {
                StowageError::InvalidData {
                    message: format!("{} '{}' fields: {e}", record.entity, record.key),
                }
            })?;
            let now = Utc::now().to_rfc3339();

            let tx = conn.transaction()?;
            // An existing id that now points at another key frees its old slot.
            if let Some(id) = record.id {
                tx.execute(
                    r#"
                    DELETE FROM records
                    WHERE id = ?1 AND container = ?2 AND context = ?3 AND entity = ?4 AND key != ?5
                    "#,
                    params![id, boundary.container(), boundary.context(), record.entity, record.key],
                )?;
            }
            tx.execute(
                r#"
                INSERT INTO records (container, context, entity, key, fields, updated_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                ON CONFLICT(container, context, entity, key)
                DO UPDATE SET fields = excluded.fields, updated_at = excluded.updated_at
                "#,
                params![
                    boundary.container(),
                    boundary.context(),
                    record.entity,
                    record.key,
                    fields,
                    now,
                ],
            )?;
            let id: i64 = tx.query_row(
                r#"
                SELECT id FROM records
                WHERE container = ?1 AND context = ?2 AND entity = ?3 AND key = ?4
                "#,
                params![boundary.container(), boundary.context(), record.entity, record.key],
                |row| row.get(0),
            )?;
            tx.commit()?;

            Ok(Record {
                id: Some(id),
                ..record
            })
        })
        .await
    }

    async fn delete(&self, boundary: &RecordBoundary, record: &Record) -> StowageResult<()> {
        let boundary = boundary.clone();
        let entity = record.entity.clone();
        let key = record.key.clone();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                r#"
                DELETE FROM records
                WHERE container = ?1 AND context = ?2 AND entity = ?3 AND key = ?4
                "#,
                params![boundary.container(), boundary.context(), entity, key],
            )?;
            if removed == 0 {
                return Err(StowageError::NotFound {
                    boundary: boundary.to_string(),
                    key,
                });
            }
            Ok(())
        })
        .await
    }

    async fn batch_delete(&self, boundary: &RecordBoundary, entity: &str) -> StowageResult<u64> {
        let boundary = boundary.clone();
        let entity = entity.to_string();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM records WHERE container = ?1 AND context = ?2 AND entity = ?3",
                params![boundary.container(), boundary.context(), entity],
            )?;
            Ok(removed as u64)
        })
        .await
    }
}

impl SqliteRecordStore {
    /// Number of records of `entity` in `boundary`.
    pub fn count(&self, boundary: &RecordBoundary, entity: &str) -> StowageResult<u64> {
        let conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM records WHERE container = ?1 AND context = ?2 AND entity = ?3",
            params![boundary.container(), boundary.context(), entity],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }
}
