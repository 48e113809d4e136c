//! In-process document store used by tests and local tooling.

use super::{DocumentStore, Filter, StoreError, StoreResult, StoredDocument, WriteBatch, WriteOp};
use crate::document::{Document, Patch};
use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

type Collections = BTreeMap<String, BTreeMap<String, Document>>;

#[derive(Debug, Default)]
struct MemoryState {
    collections: Collections,
    writes: usize,
}

/// Mutex-guarded nested maps: collection -> id -> document.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of document writes applied so far (committed batch ops count
    /// individually).
    pub fn write_count(&self) -> usize {
        self.lock().map_or(0, |state| state.writes)
    }

    /// Ids currently stored in `collection`, in order.
    pub fn ids(&self, collection: &str) -> Vec<String> {
        self.lock()
            .map(|state| {
                state
                    .collections
                    .get(collection)
                    .map(|docs| docs.keys().cloned().collect())
                    .unwrap_or_default()
            })
            .unwrap_or_default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }

    fn write(&self, op: WriteOp) -> StoreResult<()> {
        let mut state = self.lock()?;
        apply_op(&mut state.collections, &op)?;
        state.writes += 1;
        Ok(())
    }
}

fn apply_op(collections: &mut Collections, op: &WriteOp) -> StoreResult<()> {
    let (collection, id) = op.target();
    let current = collections
        .get(collection)
        .and_then(|docs| docs.get(id))
        .cloned();
    match op.apply(current)? {
        Some(doc) => {
            collections
                .entry(collection.to_string())
                .or_default()
                .insert(id.to_string(), doc);
        }
        None => {
            if let Some(docs) = collections.get_mut(collection) {
                docs.remove(id);
            }
        }
    }
    Ok(())
}

impl DocumentStore for MemoryDocumentStore {
    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>> {
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .and_then(|docs| docs.get(id))
            .cloned())
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
        let state = self.lock()?;
        Ok(state
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, doc)| filter.matches(doc))
                    .map(|(id, doc)| StoredDocument {
                        id: id.clone(),
                        data: doc.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    fn commit(&self, batch: WriteBatch) -> StoreResult<()> {
        let mut state = self.lock()?;
        let mut staged = state.collections.clone();
        let count = batch.len();
        for op in batch.ops() {
            apply_op(&mut staged, op)?;
        }
        state.collections = staged;
        state.writes += count;
        Ok(())
    }
}
