//! Typed handle to one stored document.
//!
//! # Responsibility
//! - Resolve identity (explicit, from a reference object, or generated on
//!   first persistence) and lazily load the backing snapshot.
//! - Stage or apply create/update/merge/delete writes.
//! - Own the per-instance relation memo.
//!
//! # Invariants
//! - Once bound, an entity id never changes for that instance.
//! - Every write invalidates the in-memory snapshot.
//! - Writes staged into a caller batch are not durable until the caller
//!   commits that batch.

use crate::document::path::get_path;
use crate::document::{into_document, Document, DocumentError, FieldPath, Patch};
use crate::model::datastore::Datastore;
use crate::model::descriptor::ModelDescriptor;
use crate::model::registry::RegistryError;
use crate::relation::RelationState;
use crate::store::{DocumentStore, Filter, FilterOp, StoreError, WriteBatch, WriteOp};
use log::debug;
use once_cell::unsync::OnceCell;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::rc::Rc;

pub type EntityResult<T> = Result<T, EntityError>;

#[derive(Debug)]
pub enum EntityError {
    Store(StoreError),
    Document(DocumentError),
    Registry(RegistryError),
    /// The operation needs an id and none has been bound yet.
    UnboundId { model: &'static str },
    /// A different id was offered to an entity that already has one.
    IdAlreadyBound { model: &'static str, id: String },
}

impl Display for EntityError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Document(err) => write!(f, "{err}"),
            Self::Registry(err) => write!(f, "{err}"),
            Self::UnboundId { model } => write!(f, "{model} entity has no id yet"),
            Self::IdAlreadyBound { model, id } => {
                write!(f, "{model} entity is already bound to id `{id}`")
            }
        }
    }
}

impl Error for EntityError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Store(err) => Some(err),
            Self::Document(err) => Some(err),
            Self::Registry(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StoreError> for EntityError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<DocumentError> for EntityError {
    fn from(value: DocumentError) -> Self {
        Self::Document(value)
    }
}

impl From<RegistryError> for EntityError {
    fn from(value: RegistryError) -> Self {
        Self::Registry(value)
    }
}

/// Handle to `<collection>/<id>`.
pub struct Entity {
    db: Datastore,
    model: &'static ModelDescriptor,
    id: OnceCell<String>,
    /// `None` until loaded; `Some(None)` when the document does not exist.
    snapshot: RefCell<Option<Option<Document>>>,
    pub(crate) relations: RefCell<BTreeMap<&'static str, Rc<RelationState>>>,
}

impl Debug for Entity {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Entity")
            .field("collection", &self.model.collection)
            .field("id", &self.id.get())
            .finish()
    }
}

impl Entity {
    pub fn new(db: Datastore, model: &'static ModelDescriptor, id: Option<&str>) -> Self {
        let cell = OnceCell::new();
        if let Some(id) = id.map(str::trim).filter(|id| !id.is_empty()) {
            let _ = cell.set(id.to_string());
        }
        Self {
            db,
            model,
            id: cell,
            snapshot: RefCell::new(None),
            relations: RefCell::new(BTreeMap::new()),
        }
    }

    /// Builds an entity whose snapshot is already known, as delivered by a
    /// trigger.
    pub fn with_snapshot(
        db: Datastore,
        model: &'static ModelDescriptor,
        id: &str,
        data: Option<Document>,
    ) -> Self {
        let entity = Self::new(db, model, Some(id));
        *entity.snapshot.borrow_mut() = Some(data);
        entity
    }

    /// Builds an entity from a stored reference object (`{"id": ...}`).
    ///
    /// Returns `None` when the reference carries no string id.
    pub fn from_reference(
        db: Datastore,
        model: &'static ModelDescriptor,
        reference: &Value,
    ) -> Option<Self> {
        let id = reference.get("id")?.as_str()?;
        Some(Self::new(db, model, Some(id)))
    }

    /// Returns every entity of `model_name` whose field at `path` satisfies
    /// `op value`.
    pub fn find_where(
        db: &Datastore,
        model_name: &str,
        path: impl Into<FieldPath>,
        op: &str,
        value: Value,
    ) -> EntityResult<Vec<Entity>> {
        let model = db.registry().resolve(model_name)?;
        let op: FilterOp = op.parse()?;
        let filter = Filter::new(path, op, value);
        let found = db.store().query(model.collection, &filter)?;
        Ok(found
            .into_iter()
            .map(|doc| Self::with_snapshot(db.clone(), model, &doc.id, Some(doc.data)))
            .collect())
    }

    pub fn datastore(&self) -> &Datastore {
        &self.db
    }

    pub(crate) fn store(&self) -> &dyn DocumentStore {
        self.db.store()
    }

    pub fn model(&self) -> &'static ModelDescriptor {
        self.model
    }

    pub fn collection(&self) -> &'static str {
        self.model.collection
    }

    pub fn id(&self) -> Option<&str> {
        self.id.get().map(String::as_str)
    }

    pub fn require_id(&self) -> EntityResult<&str> {
        self.id().ok_or(EntityError::UnboundId {
            model: self.model.name,
        })
    }

    /// Binds `id` unless another id is already bound.
    pub fn bind_id(&self, id: &str) -> EntityResult<&str> {
        let bound = self.id.get_or_init(|| id.to_string());
        if bound != id {
            return Err(EntityError::IdAlreadyBound {
                model: self.model.name,
                id: bound.clone(),
            });
        }
        Ok(bound)
    }

    /// `collection/id`, once an id is bound.
    pub fn path(&self) -> Option<String> {
        self.id().map(|id| format!("{}/{id}", self.model.collection))
    }

    /// Whole document, loading it on first access.
    pub fn data(&self) -> EntityResult<Option<Document>> {
        self.load()?;
        Ok(self.snapshot.borrow().clone().flatten())
    }

    /// Value at `path`; `None` when the field or the document is absent.
    pub fn get_field(&self, path: impl Into<FieldPath>) -> EntityResult<Option<Value>> {
        let path = path.into();
        self.load()?;
        let snapshot = self.snapshot.borrow();
        Ok(snapshot
            .as_ref()
            .and_then(Option::as_ref)
            .and_then(|doc| get_path(doc, &path))
            .cloned())
    }

    pub fn exists(&self) -> EntityResult<bool> {
        self.load()?;
        Ok(matches!(&*self.snapshot.borrow(), Some(Some(_))))
    }

    /// Drops the cached snapshot so the next read hits the store.
    pub fn refresh(&self) {
        *self.snapshot.borrow_mut() = None;
    }

    /// Writes `data` as the whole document, generating an id when none is
    /// bound. Returns the id.
    pub fn create(&self, data: Value, ctx: Option<&mut WriteBatch>) -> EntityResult<&str> {
        let doc = into_document(data, "create")?;
        let id = self.ensure_id();
        self.stage(
            WriteOp::Set {
                collection: self.model.collection.to_string(),
                id: id.to_string(),
                data: doc,
            },
            ctx,
        )?;
        Ok(id)
    }

    /// Applies `partial` leaf by leaf to the existing document.
    pub fn update(&self, partial: &Value, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        self.update_fields(Patch::flatten(partial)?, ctx)
    }

    pub fn update_fields(&self, patch: Patch, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        if patch.is_empty() {
            return Ok(());
        }
        let id = self.require_id()?.to_string();
        self.stage(
            WriteOp::Update {
                collection: self.model.collection.to_string(),
                id,
                patch,
            },
            ctx,
        )
    }

    /// Merge-write: creates the document when absent, otherwise patches it.
    pub fn update_or_create(
        &self,
        partial: &Value,
        ctx: Option<&mut WriteBatch>,
    ) -> EntityResult<()> {
        self.merge_fields(Patch::flatten(partial)?, ctx)
    }

    pub fn merge_fields(&self, patch: Patch, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        let id = self.ensure_id().to_string();
        self.stage(
            WriteOp::Merge {
                collection: self.model.collection.to_string(),
                id,
                patch,
            },
            ctx,
        )
    }

    pub fn delete(&self, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        let id = self.require_id()?.to_string();
        self.stage(
            WriteOp::Delete {
                collection: self.model.collection.to_string(),
                id,
            },
            ctx,
        )
    }

    /// Deletes the document together with its secure mirror.
    pub fn destroy(&self, mut ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        self.on_delete(ctx.as_deref_mut())?;
        self.delete(ctx)
    }

    /// Creation hook: opens the paired secure document when the model
    /// declares one.
    pub fn on_create(&self, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        if !self.model.secure {
            return Ok(());
        }
        self.merge_secure_fields(Patch::new(), ctx)
    }

    /// Deletion hook: removes the paired secure document.
    pub fn on_delete(&self, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        if !self.model.secure {
            return Ok(());
        }
        let op = WriteOp::Delete {
            collection: self.model.secure_collection(),
            id: self.require_id()?.to_string(),
        };
        self.stage_raw(op, ctx)
    }

    /// Paired document in the secure mirror collection, read through.
    pub fn secure_data(&self) -> EntityResult<Option<Document>> {
        let id = self.require_id()?;
        Ok(self
            .store()
            .get_document(&self.model.secure_collection(), id)?)
    }

    pub fn merge_secure_fields(
        &self,
        patch: Patch,
        ctx: Option<&mut WriteBatch>,
    ) -> EntityResult<()> {
        let op = WriteOp::Merge {
            collection: self.model.secure_collection(),
            id: self.require_id()?.to_string(),
            patch,
        };
        self.stage_raw(op, ctx)
    }

    fn ensure_id(&self) -> &str {
        self.id.get_or_init(|| self.store().generate_id())
    }

    fn load(&self) -> EntityResult<()> {
        if self.snapshot.borrow().is_some() {
            return Ok(());
        }
        let data = match self.id() {
            Some(id) => self.store().get_document(self.model.collection, id)?,
            None => None,
        };
        *self.snapshot.borrow_mut() = Some(data);
        Ok(())
    }

    fn stage(&self, op: WriteOp, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        self.stage_raw(op, ctx)?;
        self.refresh();
        Ok(())
    }

    fn stage_raw(&self, op: WriteOp, ctx: Option<&mut WriteBatch>) -> EntityResult<()> {
        let (collection, id) = op.target();
        match ctx {
            Some(batch) => {
                debug!(
                    "event=entity_write module=entity status=staged op={} collection={collection} id={id}",
                    op.kind()
                );
                batch.push(op);
            }
            None => {
                debug!(
                    "event=entity_write module=entity status=applied op={} collection={collection} id={id}",
                    op.kind()
                );
                self.store().apply(&op)?;
            }
        }
        Ok(())
    }
}
