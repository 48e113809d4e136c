//! Schemaless document primitives shared by stores and relations.
//!
//! # Responsibility
//! - Represent stored documents as JSON objects.
//! - Address nested fields with segment-based paths (ids may contain dots).
//! - Express writes as flattened patches that can carry deletion sentinels.
//!
//! # Invariants
//! - A document is always a JSON object at the top level.
//! - Patch application never touches paths the patch does not name.

use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod change;
pub mod diff;
pub mod patch;
pub mod path;

pub use change::{Change, Snapshot};
pub use patch::{FieldValue, Patch};
pub use path::FieldPath;

/// One stored document body.
pub type Document = Map<String, Value>;

pub type DocumentResult<T> = Result<T, DocumentError>;

/// Shape errors raised while converting caller payloads into documents.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// Payload was expected to be a JSON object.
    NotAnObject(&'static str),
    /// A write addressed the document root instead of a field.
    EmptyPath,
}

impl Display for DocumentError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotAnObject(context) => write!(f, "{context} payload must be a JSON object"),
            Self::EmptyPath => write!(f, "field path must name at least one segment"),
        }
    }
}

impl Error for DocumentError {}

/// Converts a JSON value into a document body.
pub fn into_document(value: Value, context: &'static str) -> DocumentResult<Document> {
    match value {
        Value::Object(map) => Ok(map),
        _ => Err(DocumentError::NotAnObject(context)),
    }
}
