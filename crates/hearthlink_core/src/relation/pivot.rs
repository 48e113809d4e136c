//! Many-to-many join records.
//!
//! # Responsibility
//! - Derive the deterministic pivot identity for an unordered entity pair.
//! - Parse the `<collectionA>_<collectionB>/<idA>_<idB>` path form.
//! - Read and write the pivot document.
//!
//! # Invariants
//! - `pivot_identity(a, b) == pivot_identity(b, a)`.
//! - Malformed paths fail fast with a distinct error per missing separator.

use crate::document::path::get_path;
use crate::document::{Document, FieldPath, Patch};
use crate::model::{Datastore, Entity, EntityResult, ModelDescriptor};
use crate::relation::{stage_write, RelationError, RelationResult};
use crate::store::{StoreResult, WriteBatch, WriteOp};
use serde_json::Value;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Separator between the two collection names and between the two ids.
pub const PIVOT_SEPARATOR: char = '_';

/// Key of the mutual data object inside pivot documents and relation entries.
pub const PIVOT_FIELD: &str = "pivot";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PivotPathError {
    MissingSlash(String),
    MissingNameSeparator(String),
    MissingIdSeparator(String),
}

impl Display for PivotPathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingSlash(path) => write!(
                f,
                "pivot path `{path}` must be `<name>/<id>` separated with a slash"
            ),
            Self::MissingNameSeparator(path) => write!(
                f,
                "pivot name in `{path}` must be two collections separated with an underscore"
            ),
            Self::MissingIdSeparator(path) => write!(
                f,
                "pivot id in `{path}` must be two ids separated with an underscore"
            ),
        }
    }
}

impl Error for PivotPathError {}

/// Parsed `name/id` pivot path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PivotPath {
    pub name: String,
    pub id: String,
}

impl PivotPath {
    pub fn parse(path: &str) -> Result<Self, PivotPathError> {
        let trimmed = path.trim().trim_matches('/');
        let (name, id) = trimmed
            .split_once('/')
            .ok_or_else(|| PivotPathError::MissingSlash(path.to_string()))?;
        if !name.contains(PIVOT_SEPARATOR) {
            return Err(PivotPathError::MissingNameSeparator(path.to_string()));
        }
        if !id.contains(PIVOT_SEPARATOR) {
            return Err(PivotPathError::MissingIdSeparator(path.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            id: id.to_string(),
        })
    }

    /// The two collection names, in stored order.
    pub fn collections(&self) -> (&str, &str) {
        split_pair(&self.name)
    }

    /// The two ids, in the same order as `collections`.
    ///
    /// Splits at the first separator, so an id that itself contains `_`
    /// is misread; prefer the pivot document's identity fields.
    pub fn ids(&self) -> (&str, &str) {
        split_pair(&self.id)
    }
}

impl Display for PivotPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.name, self.id)
    }
}

fn split_pair(joined: &str) -> (&str, &str) {
    joined.split_once(PIVOT_SEPARATOR).unwrap_or((joined, ""))
}

fn identity_id<'d>(data: Option<&'d Document>, model: &ModelDescriptor) -> Option<&'d str> {
    let path = FieldPath::from_segments([model.name, "id"]);
    data.and_then(|doc| get_path(doc, &path))
        .and_then(Value::as_str)
}

/// Returns `(collection name, document id)` for the pair, independent of
/// argument order.
pub fn pivot_identity(
    collection_a: &str,
    id_a: &str,
    collection_b: &str,
    id_b: &str,
) -> (String, String) {
    let ((first_collection, first_id), (second_collection, second_id)) =
        if (collection_a, id_a) <= (collection_b, id_b) {
            ((collection_a, id_a), (collection_b, id_b))
        } else {
            ((collection_b, id_b), (collection_a, id_a))
        };
    (
        format!("{first_collection}{PIVOT_SEPARATOR}{second_collection}"),
        format!("{first_id}{PIVOT_SEPARATOR}{second_id}"),
    )
}

/// Handle to one pivot document.
#[derive(Debug, Clone)]
pub struct Pivot {
    db: Datastore,
    sides: [(&'static ModelDescriptor, String); 2],
    name: String,
    id: String,
}

impl Pivot {
    /// Pivot between two persisted (id-bound) entities.
    pub fn between(owner: &Entity, property: &Entity) -> EntityResult<Self> {
        Ok(Self::from_parts(
            owner.datastore().clone(),
            (owner.model(), owner.require_id()?),
            (property.model(), property.require_id()?),
        ))
    }

    pub fn from_parts(
        db: Datastore,
        a: (&'static ModelDescriptor, &str),
        b: (&'static ModelDescriptor, &str),
    ) -> Self {
        let (name, id) = pivot_identity(a.0.collection, a.1, b.0.collection, b.1);
        Self {
            db,
            sides: [(a.0, a.1.to_string()), (b.0, b.1.to_string())],
            name,
            id,
        }
    }

    /// Pivot from its raw path; both collections must be registered.
    pub fn from_path(db: &Datastore, path: &str) -> RelationResult<Self> {
        Self::from_document(db, path, None)
    }

    /// Pivot from its path and stored body. Side ids come from the
    /// document's `{<model>: {id}}` identity fields when present, so ids
    /// containing the separator resolve correctly; otherwise the path id
    /// is split.
    pub fn from_document(
        db: &Datastore,
        path: &str,
        data: Option<&Document>,
    ) -> RelationResult<Self> {
        let parsed = PivotPath::parse(path)?;
        let (collection_a, collection_b) = parsed.collections();
        let model_a = db.registry().resolve(collection_a)?;
        let model_b = db.registry().resolve(collection_b)?;
        let identity = if model_a.name == model_b.name {
            None
        } else {
            identity_id(data, model_a).zip(identity_id(data, model_b))
        };
        let (id_a, id_b) = identity.unwrap_or_else(|| parsed.ids());
        let pivot = Self::from_parts(db.clone(), (model_a, id_a), (model_b, id_b));
        if pivot.name != parsed.name || pivot.id != parsed.id {
            return Err(RelationError::NonCanonicalPivot(parsed.to_string()));
        }
        Ok(pivot)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> String {
        format!("{}/{}", self.name, self.id)
    }

    /// The two `(model, id)` sides in construction order.
    pub fn sides(&self) -> &[(&'static ModelDescriptor, String); 2] {
        &self.sides
    }

    /// Entity handles for both sides.
    pub fn entities(&self) -> [Entity; 2] {
        let [(model_a, id_a), (model_b, id_b)] = &self.sides;
        [
            self.db.entity_for(*model_a, Some(id_a.as_str())),
            self.db.entity_for(*model_b, Some(id_b.as_str())),
        ]
    }

    pub fn data(&self) -> StoreResult<Option<Document>> {
        self.db.store().get_document(&self.name, &self.id)
    }

    pub fn exists(&self) -> StoreResult<bool> {
        Ok(self.data()?.is_some())
    }

    pub fn get_field(&self, path: impl Into<FieldPath>) -> StoreResult<Option<Value>> {
        let path = path.into();
        Ok(self
            .data()?
            .and_then(|doc| get_path(&doc, &path).cloned()))
    }

    /// Identity fields written on attach: `{<model>: {id}}` for both sides.
    pub fn identity_patch(&self) -> Patch {
        let mut patch = Patch::new();
        for (model, id) in &self.sides {
            patch.set(
                FieldPath::from_segments([model.name, "id"]),
                Value::String(id.clone()),
            );
        }
        patch
    }

    pub fn merge_fields(&self, patch: Patch, ctx: Option<&mut WriteBatch>) -> StoreResult<()> {
        self.write(
            WriteOp::Merge {
                collection: self.name.clone(),
                id: self.id.clone(),
                patch,
            },
            ctx,
        )
    }

    pub fn delete(&self, ctx: Option<&mut WriteBatch>) -> StoreResult<()> {
        self.write(
            WriteOp::Delete {
                collection: self.name.clone(),
                id: self.id.clone(),
            },
            ctx,
        )
    }

    fn write(&self, op: WriteOp, ctx: Option<&mut WriteBatch>) -> StoreResult<()> {
        stage_write(&self.db, op, ctx)
    }
}
