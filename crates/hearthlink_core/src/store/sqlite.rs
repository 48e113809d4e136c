//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist documents as JSON text in the single `documents` table.
//! - Run batch commits inside one SQLite transaction.
//!
//! # Invariants
//! - Every stored payload is a JSON object; anything else is reported as
//!   `StoreError::InvalidData` on read.
//! - Field queries are evaluated in Rust after loading one collection.

use super::{DocumentStore, Filter, StoreError, StoreResult, StoredDocument, WriteBatch, WriteOp};
use crate::db::{open_db, open_db_in_memory};
use crate::document::{Document, Patch};
use log::{debug, error};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::Value;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

pub struct SqliteDocumentStore {
    conn: Mutex<Connection>,
}

impl SqliteDocumentStore {
    /// Wraps an already migrated connection.
    pub fn new(conn: Connection) -> Self {
        Self {
            conn: Mutex::new(conn),
        }
    }

    pub fn open(path: impl AsRef<Path>) -> StoreResult<Self> {
        Ok(Self::new(open_db(path)?))
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        Ok(Self::new(open_db_in_memory()?))
    }

    /// Returns `(collection, document count)` pairs, sorted by collection.
    pub fn collection_counts(&self) -> StoreResult<Vec<(String, u64)>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT collection, COUNT(*)
             FROM documents
             GROUP BY collection
             ORDER BY collection ASC;",
        )?;
        let mut rows = stmt.query([])?;
        let mut counts = Vec::new();
        while let Some(row) = rows.next()? {
            counts.push((row.get(0)?, row.get::<_, i64>(1)?.max(0) as u64));
        }
        Ok(counts)
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self, op: WriteOp) -> StoreResult<()> {
        let conn = self.lock()?;
        apply_op(&conn, &op)
    }
}

fn read_document(conn: &Connection, collection: &str, id: &str) -> StoreResult<Option<Document>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM documents WHERE collection = ?1 AND id = ?2;",
            params![collection, id],
            |row| row.get(0),
        )
        .optional()?;
    raw.map(|text| parse_document(collection, id, &text))
        .transpose()
}

fn parse_document(collection: &str, id: &str, text: &str) -> StoreResult<Document> {
    match serde_json::from_str::<Value>(text)? {
        Value::Object(map) => Ok(map),
        _ => Err(StoreError::InvalidData(format!(
            "{collection}/{id} is not a JSON object"
        ))),
    }
}

fn write_document(
    conn: &Connection,
    collection: &str,
    id: &str,
    doc: Option<&Document>,
) -> StoreResult<()> {
    match doc {
        Some(doc) => {
            let text = serde_json::to_string(doc)?;
            conn.execute(
                "INSERT INTO documents (collection, id, data, updated_at)
                 VALUES (?1, ?2, ?3, (strftime('%s', 'now') * 1000))
                 ON CONFLICT (collection, id) DO UPDATE SET
                    data = excluded.data,
                    updated_at = excluded.updated_at;",
                params![collection, id, text],
            )?;
        }
        None => {
            conn.execute(
                "DELETE FROM documents WHERE collection = ?1 AND id = ?2;",
                params![collection, id],
            )?;
        }
    }
    Ok(())
}

fn apply_op(conn: &Connection, op: &WriteOp) -> StoreResult<()> {
    let (collection, id) = op.target();
    let current = match op {
        WriteOp::Set { .. } | WriteOp::Delete { .. } => None,
        WriteOp::Merge { .. } | WriteOp::Update { .. } => read_document(conn, collection, id)?,
    };
    let next = op.apply(current)?;
    write_document(conn, collection, id, next.as_ref())
}

impl DocumentStore for SqliteDocumentStore {
    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let conn = self.lock()?;
        read_document(&conn, collection, id)
    }

    fn set_document(&self, collection: &str, id: &str, data: &Document) -> StoreResult<()> {
        self.write(WriteOp::Set {
            collection: collection.to_string(),
            id: id.to_string(),
            data: data.clone(),
        })
    }

    fn merge_document(&self, collection: &str, id: &str, patch: &Patch) -> StoreResult<()> {
        self.write(WriteOp::Merge {
            collection: collection.to_string(),
            id: id.to_string(),
            patch: patch.clone(),
        })
    }

    fn update_document(&self, collection: &str, id: &str, patch: &Patch) -> StoreResult<()> {
        self.write(WriteOp::Update {
            collection: collection.to_string(),
            id: id.to_string(),
            patch: patch.clone(),
        })
    }

    fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()> {
        self.write(WriteOp::Delete {
            collection: collection.to_string(),
            id: id.to_string(),
        })
    }

    fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<StoredDocument>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, data
             FROM documents
             WHERE collection = ?1
             ORDER BY id ASC;",
        )?;
        let mut rows = stmt.query([collection])?;
        let mut matches = Vec::new();
        while let Some(row) = rows.next()? {
            let id: String = row.get(0)?;
            let text: String = row.get(1)?;
            let data = parse_document(collection, &id, &text)?;
            if filter.matches(&data) {
                matches.push(StoredDocument { id, data });
            }
        }
        Ok(matches)
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let count = batch.len();
        for op in batch.ops() {
            if let Err(err) = apply_op(&tx, op) {
                let (collection, id) = op.target();
                error!(
                    "event=batch_commit module=store status=error op={} collection={collection} id={id} error={err}",
                    op.kind()
                );
                return Err(err);
            }
        }
        tx.commit()?;
        debug!("event=batch_commit module=store status=ok ops={count}");
        Ok(())
    }
}
