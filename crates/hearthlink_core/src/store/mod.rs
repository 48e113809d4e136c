//! Document store adapter contracts.
//!
//! # Responsibility
//! - Define the capability the relational layer consumes: keyed document
//!   reads/writes, field queries, and all-or-nothing write batches.
//! - Share write semantics between store implementations so the in-memory
//!   and SQLite stores cannot drift apart.
//!
//! # Invariants
//! - `update_document` fails with `NotFound` when the document is absent.
//! - `merge_document` creates the document when absent and never removes a
//!   field unless the patch carries `FieldValue::Delete` for it.
//! - `commit` applies every staged write or none of them.

use crate::db::DbError;
use crate::document::path::get_path;
use crate::document::{Document, DocumentError, FieldPath, Patch};
use serde_json::Value;
use std::cmp::Ordering;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;
use uuid::Uuid;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryDocumentStore;
pub use sqlite::SqliteDocumentStore;

pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by document store implementations.
#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Document(DocumentError),
    Serialization(serde_json::Error),
    NotFound { collection: String, id: String },
    InvalidFilter(String),
    InvalidData(String),
    Poisoned,
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "document serialization failed: {err}"),
            Self::NotFound { collection, id } => {
                write!(f, "document not found: {collection}/{id}")
            }
            Self::InvalidFilter(op) => write!(f, "unsupported query operator `{op}`"),
            Self::InvalidData(message) => write!(f, "invalid stored document: {message}"),
            Self::Poisoned => write!(f, "document store lock poisoned"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<DocumentError> for StoreError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// One document returned by a query.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    pub id: String,
    pub data: Document,
}

/// Comparison operator for single-field queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    NotEq,
    Lt,
    Lte,
    Gt,
    Gte,
    ArrayContains,
}

impl FromStr for FilterOp {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim() {
            "==" => Ok(Self::Eq),
            "!=" => Ok(Self::NotEq),
            "<" => Ok(Self::Lt),
            "<=" => Ok(Self::Lte),
            ">" => Ok(Self::Gt),
            ">=" => Ok(Self::Gte),
            "array-contains" => Ok(Self::ArrayContains),
            other => Err(StoreError::InvalidFilter(other.to_string())),
        }
    }
}

/// `path op value` predicate over one collection.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub path: FieldPath,
    pub op: FilterOp,
    pub value: Value,
}

impl Filter {
    pub fn new(path: impl Into<FieldPath>, op: FilterOp, value: Value) -> Self {
        Self {
            path: path.into(),
            op,
            value,
        }
    }

    pub fn equals(path: impl Into<FieldPath>, value: Value) -> Self {
        Self::new(path, FilterOp::Eq, value)
    }

    /// Documents without the field never match, whatever the operator.
    pub fn matches(&self, doc: &Document) -> bool {
        let Some(field) = get_path(doc, &self.path) else {
            return false;
        };
        match self.op {
            FilterOp::Eq => field == &self.value,
            FilterOp::NotEq => field != &self.value,
            FilterOp::Lt => compare(field, &self.value) == Some(Ordering::Less),
            FilterOp::Lte => matches!(
                compare(field, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            FilterOp::Gt => compare(field, &self.value) == Some(Ordering::Greater),
            FilterOp::Gte => matches!(
                compare(field, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            FilterOp::ArrayContains => field
                .as_array()
                .is_some_and(|items| items.contains(&self.value)),
        }
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

/// One staged write.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    Set {
        collection: String,
        id: String,
        data: Document,
    },
    Merge {
        collection: String,
        id: String,
        patch: Patch,
    },
    Update {
        collection: String,
        id: String,
        patch: Patch,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    pub fn target(&self) -> (&str, &str) {
        match self {
            Self::Set { collection, id, .. }
            | Self::Merge { collection, id, .. }
            | Self::Update { collection, id, .. }
            | Self::Delete { collection, id } => (collection.as_str(), id.as_str()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Set { .. } => "set",
            Self::Merge { .. } => "merge",
            Self::Update { .. } => "update",
            Self::Delete { .. } => "delete",
        }
    }

    /// Computes the document state after this write.
    ///
    /// `None` in and out means "no document".
    pub fn apply(&self, current: Option<Document>) -> StoreResult<Option<Document>> {
        match self {
            Self::Set { data, .. } => Ok(Some(data.clone())),
            Self::Merge { patch, .. } => {
                let mut doc = current.unwrap_or_default();
                patch.apply_to(&mut doc)?;
                Ok(Some(doc))
            }
            Self::Update {
                collection,
                id,
                patch,
            } => {
                let mut doc = current.ok_or_else(|| StoreError::NotFound {
                    collection: collection.clone(),
                    id: id.clone(),
                })?;
                patch.apply_to(&mut doc)?;
                Ok(Some(doc))
            }
            Self::Delete { .. } => Ok(None),
        }
    }
}

/// Atomic write context. Nothing staged here is visible to readers until
/// the owning store commits it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WriteBatch {
    ops: Vec<WriteOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: WriteOp) {
        self.ops.push(op);
    }

    pub fn ops(&self) -> &[WriteOp] {
        &self.ops
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

/// Capability consumed by entities and relations.
pub trait DocumentStore: Send + Sync {
    fn get_document(&self, collection: &str, id: &str) -> StoreResult<Option<Document>>;

    /// Replaces the whole document.
    fn set_document(&self, collection: &str, id: &str, data: &Document) -> StoreResult<()>;

    /// Set-with-merge: creates the document when absent, otherwise applies
    /// the patch leaf by leaf.
    fn merge_document(&self, collection: &str, id: &str, patch: &Patch) -> StoreResult<()>;

    /// Applies a flattened patch to an existing document.
    fn update_document(&self, collection: &str, id: &str, patch: &Patch) -> StoreResult<()>;

    /// Removes the document. Deleting a missing document is not an error.
    fn delete_document(&self, collection: &str, id: &str) -> StoreResult<()>;

    /// Returns every document of `collection` matching `filter`, ordered by id.
    fn query(&self, collection: &str, filter: &Filter) -> StoreResult<Vec<StoredDocument>>;

    /// Applies all staged writes atomically.
    fn commit(&self, batch: WriteBatch) -> StoreResult<()>;

    fn query_equals(
        &self,
        collection: &str,
        path: &FieldPath,
        value: &Value,
    ) -> StoreResult<Vec<StoredDocument>> {
        self.query(collection, &Filter::equals(path.clone(), value.clone()))
    }

    /// Generates an id for a document created without one.
    fn generate_id(&self) -> String {
        Uuid::new_v4().simple().to_string()
    }

    fn new_batch(&self) -> WriteBatch {
        WriteBatch::new()
    }

    /// Executes one write immediately.
    fn apply(&self, op: &WriteOp) -> StoreResult<()> {
        match op {
            WriteOp::Set {
                collection,
                id,
                data,
            } => self.set_document(collection, id, data),
            WriteOp::Merge {
                collection,
                id,
                patch,
            } => self.merge_document(collection, id, patch),
            WriteOp::Update {
                collection,
                id,
                patch,
            } => self.update_document(collection, id, patch),
            WriteOp::Delete { collection, id } => self.delete_document(collection, id),
        }
    }
}
